//! Interface de terminal da esteira: saída colorida e barra de progresso.
//!
//! Usa `console` para estilização com cores e `indicatif` para desenhar o
//! progresso ponderado da macro tarefa. O [`Report`] imprime a visão de uma
//! macro tarefa, o resultado das ações de um plano e os eventos recebidos.

use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::engine::{MacroTaskView, StepView};
use crate::events::Event;
use crate::plan::ActionReport;
use crate::workflow::DisplayStatus;

/// Impressora colorida para a visão de uma macro tarefa.
pub struct Report {
    // Verde para etapas concluídas e ações aceitas.
    green: Style,
    // Vermelho para ações rejeitadas.
    red: Style,
    // Amarelo para etapas devolvidas.
    yellow: Style,
    // Ciano para etapas em execução.
    cyan: Style,
    dim: Style,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }

    /// Rótulo colorido do status exibido de uma etapa.
    pub fn status_label(&self, status: DisplayStatus) -> String {
        let label = status.to_string();
        let style = match status {
            DisplayStatus::Completed => &self.green,
            DisplayStatus::InProgress => &self.cyan,
            DisplayStatus::Returned => &self.yellow,
            DisplayStatus::Blocked => &self.dim,
            DisplayStatus::Pending => return label,
        };
        style.apply_to(label).to_string()
    }

    fn step_line(&self, view: &StepView) -> String {
        let step = &view.step;
        let assignee = step.assignee.as_deref().unwrap_or("-");
        format!(
            "  {:>2}. {:<12} {:<10} {} (weight {})",
            step.position + 1,
            step.function,
            assignee,
            self.status_label(view.display_status),
            step.weight
        )
    }

    /// Imprime a macro tarefa, suas etapas e a barra de progresso.
    pub fn print_view(&self, view: &MacroTaskView) {
        let task = &view.macro_task;
        println!();
        println!(
            "{} {}",
            self.green.apply_to("───"),
            self.green.apply_to(&task.title)
        );
        println!(
            "  deadline {}  priority {}  status {}",
            task.deadline, task.priority, task.status
        );
        for step in &view.steps {
            println!("{}", self.step_line(step));
        }
        self.draw_progress(view.progress);
    }

    // Desenha a barra apenas quando há progresso numérico.
    fn draw_progress(&self, progress: Option<u8>) {
        let Some(percent) = progress else {
            println!("  {}", self.dim.apply_to("no numeric progress"));
            return;
        };
        let pb = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stdout());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  [{bar:30.green/white}] {pos}%")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        pb.set_position(u64::from(percent));
        pb.abandon();
    }

    /// Imprime o resultado de cada ação de um plano.
    pub fn print_actions(&self, reports: &[ActionReport]) {
        println!();
        for report in reports {
            let head = format!(
                "#{:<2} {} stage {} as {}",
                report.index, report.op, report.stage, report.caller
            );
            match &report.error {
                None => println!("  {} {head}", self.green.apply_to("✓")),
                Some(err) => println!("  {} {head}: {err}", self.red.apply_to("✗")),
            }
        }
    }

    /// Imprime um evento recebido por um assinante.
    pub fn print_event(&self, event: &Event) {
        println!(
            "  {} {}",
            self.dim.apply_to(format!("[{:>3}]", event.sequence)),
            event.describe()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_label_is_plain() {
        let report = Report::new();
        assert_eq!(report.status_label(DisplayStatus::Pending), "pendente");
    }

    #[test]
    fn styled_labels_keep_status_text() {
        let report = Report::new();
        for status in [
            DisplayStatus::Blocked,
            DisplayStatus::InProgress,
            DisplayStatus::Returned,
            DisplayStatus::Completed,
        ] {
            let label = report.status_label(status);
            assert!(console::strip_ansi_codes(&label).contains(&status.to_string()));
        }
    }
}
