use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "spindle",
    about = "In-process task engine for the finance backend",
    version
)]
pub struct Cli {
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Which demo submissions to run
    #[arg(long, value_enum, default_value_t = Demo::All)]
    pub demo: Demo,

    /// Start the periodic scheduler and keep running until Ctrl-C
    #[arg(long)]
    pub scheduler: bool,

    /// Base of the exponential backoff used by delivery tasks
    #[arg(long, default_value_t = 250)]
    pub retry_base_ms: u64,

    /// Give up waiting for demo tasks after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Email that fails twice before it is delivered
    Email,
    /// Notification fanned out to push and email
    Notify,
    /// PDF report followed by a delivery email
    Report,
    /// Submission cancelled before a worker runs it
    Cancel,
    All,
    /// Submit nothing
    Skip,
}

impl Demo {
    pub fn includes(self, other: Demo) -> bool {
        self == Demo::All || self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["spindle"]);
        assert_eq!(cli.demo, Demo::All);
        assert!(!cli.scheduler);
        assert_eq!(cli.retry_base_ms, 250);
        assert!(cli.config.is_none());
    }

    #[rstest]
    #[case(Demo::All, Demo::Email, true)]
    #[case(Demo::Email, Demo::Email, true)]
    #[case(Demo::Email, Demo::Report, false)]
    #[case(Demo::Skip, Demo::Cancel, false)]
    fn demo_selection(#[case] chosen: Demo, #[case] demo: Demo, #[case] runs: bool) {
        assert_eq!(chosen.includes(demo), runs);
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from([
            "spindle",
            "--demo",
            "report",
            "--scheduler",
            "-c",
            "spindle.yml",
            "--retry-base-ms",
            "10",
        ]);
        assert_eq!(cli.demo, Demo::Report);
        assert!(cli.scheduler);
        assert_eq!(cli.retry_base_ms, 10);
        assert_eq!(cli.config, Some(PathBuf::from("spindle.yml")));
    }
}
