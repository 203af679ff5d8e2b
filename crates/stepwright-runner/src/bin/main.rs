use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepwright_runner::{capture_page, CaptureOptions, Job, Params, Runner};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "stepwright-runner")]
#[command(about = "Replay recorded browser interactions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a job's recording against its page snapshot, or a live page
    Replay {
        /// Job file
        job: PathBuf,

        /// Set a parameter (can be used multiple times)
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Keep going after a failed step (overrides the job)
        #[arg(long)]
        keep_going: bool,

        /// Replay on a live Chrome tab opened at this URL instead of the snapshot
        #[arg(long, value_name = "URL")]
        live: Option<String>,

        /// Show the browser window (with --live)
        #[arg(long)]
        headed: bool,

        /// Longest wait for the network to go quiet after navigating, in milliseconds
        #[arg(long, default_value_t = 5000)]
        settle_ms: u64,
    },

    /// Validate a job, its snapshot and its recording without replaying
    Check {
        /// Job file
        job: PathBuf,

        /// Set a parameter (can be used multiple times)
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Capture a page snapshot from Chrome
    Snapshot {
        /// Page to open
        url: String,

        /// Where to write the snapshot JSON
        #[arg(short, long)]
        output: PathBuf,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Longest wait for the network to go quiet, in milliseconds
        #[arg(long, default_value_t = 5000)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> stepwright_runner::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    match cli.command {
        Command::Replay {
            job,
            params,
            keep_going,
            live,
            headed,
            settle_ms,
        } => {
            let params = Params::from_args(&params)?;
            let mut job = Job::load_with_params(&job, &params)?;
            if keep_going {
                job.abort_on_failure = false;
            }

            println!("Running: {}", job.name);
            let runner = Runner::new(job);
            let result = match live {
                Some(url) => {
                    let options = CaptureOptions {
                        headless: !headed,
                        settle_ms,
                    };
                    runner.run_live(&url, &options).await?
                }
                None => runner.run().await?,
            };

            println!();
            for step in &result.report.steps {
                let mark = if step.ok { "✓" } else { "✗" };
                match &step.error {
                    Some(error) => println!("  {} {}: {}", mark, step.label, error),
                    None => println!("  {} {}", mark, step.label),
                }
            }
            println!();
            if result.success {
                println!("✓ Success");
            } else {
                println!("✗ Failed");
                if result.report.aborted {
                    println!("  Aborted after {} steps", result.report.steps.len());
                }
            }
            println!(
                "  Steps: {} ok, {} failed",
                result.report.succeeded(),
                result.report.failed()
            );
            println!("  Duration: {}ms", result.duration_ms);

            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Check { job, params } => {
            let params = Params::from_args(&params)?;
            let job = Job::load_with_params(&job, &params)?;
            let runner = Runner::new(job);
            let summary = runner.check()?;

            let job = runner.job();
            println!("Job valid: {}", job.name);
            println!("  Page: {}", job.page_path().display());
            println!("  Recording: {}", job.recording_path().display());
            println!(
                "  Steps: {} ({} interactions, {} navigations)",
                summary.steps, summary.interactions, summary.navigations
            );
            if summary.crossing_boundaries > 0 {
                println!("  Behind frames/shadow roots: {}", summary.crossing_boundaries);
            }
            if !job.params.is_empty() {
                println!("  Parameters: {}", job.params.len());
                for (name, def) in &job.params {
                    let req = if def.required { " (required)" } else { "" };
                    let desc = def.description.as_deref().unwrap_or("");
                    println!("    - {}{}: {}", name, req, desc);
                }
            }
        }
        Command::Snapshot {
            url,
            output,
            headed,
            settle_ms,
        } => {
            let options = CaptureOptions {
                headless: !headed,
                settle_ms,
            };
            let snapshot = capture_page(&url, &options).await?;
            snapshot.save(&output)?;
            println!("Saved snapshot of {} to {}", snapshot.url, output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_live_flags() {
        let cli = Cli::try_parse_from([
            "stepwright-runner",
            "replay",
            "login.yaml",
            "--live",
            "https://example.com/login",
            "--headed",
        ])
        .unwrap();
        match cli.command {
            Command::Replay {
                live,
                headed,
                settle_ms,
                ..
            } => {
                assert_eq!(live.as_deref(), Some("https://example.com/login"));
                assert!(headed);
                assert_eq!(settle_ms, 5000);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_replay_defaults_to_snapshot() {
        let cli = Cli::try_parse_from(["stepwright-runner", "replay", "login.yaml"]).unwrap();
        assert!(matches!(cli.command, Command::Replay { live: None, .. }));
    }
}
