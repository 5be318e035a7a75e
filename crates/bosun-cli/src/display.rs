//! Progress and outcome formatting for the terminal

use console::style;

use bosun_core::InstallOutcome;
use bosun_install::ExecutionTarget;

/// Announce the run before the first phase
pub fn print_start(cluster: &str, target: ExecutionTarget, dry_run: bool, silent: bool) {
    if silent {
        return;
    }
    let mode_note = if dry_run { " (dry run)" } else { "" };
    println!(
        "{} Bootstrapping GitOps control plane on {}{}",
        style("→").blue().bold(),
        style(cluster).cyan(),
        mode_note
    );
    println!(
        "{} Cluster access: {}",
        style("→").blue(),
        target.as_str()
    );
}

/// Render the terminal outcome, diagnostics last
pub fn print_outcome(outcome: &InstallOutcome, silent: bool) {
    if outcome.success {
        if !silent {
            println!("{} {}", style("✓").green().bold(), outcome.summary());
        }
        return;
    }

    if outcome.cancelled {
        eprintln!("{} {}", style("⚠").yellow().bold(), outcome.summary());
        return;
    }

    eprintln!("{} {}", style("✗").red().bold(), outcome.summary());
    if let Some(diagnostics) = &outcome.diagnostics {
        eprintln!();
        eprintln!("{}", style("Cluster state at failure:").bold());
        eprintln!("{}", diagnostics);
    }
}
