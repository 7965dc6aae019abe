use std::process::ExitCode;

use screen_operator::{RunOptions, SessionOutcome, StopHandle};

const USAGE: &str = "usage: screen-operator [--model <id>] [--accurate] <objective...>";

#[tokio::main]
async fn main() -> ExitCode {
    let mut opts = RunOptions::default();
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" | "-m" => opts.model_id = args.next(),
            "--accurate" => opts.accurate_mode = Some(true),
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            _ => words.push(arg),
        }
    }
    let objective = words.join(" ");
    if objective.trim().is_empty() {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    let stop = StopHandle::new();
    let on_ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.stop();
        }
    });

    match screen_operator::run(&objective, opts, stop).await {
        Ok(report) => {
            println!("{}", report.summary());
            match report.outcome {
                SessionOutcome::Aborted { .. } => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
