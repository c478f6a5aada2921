use clap::Parser;

/// Replays an election audit review session and reports whether the first round can be launched.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The session file, in JSON format. It contains the state of the audit, the recorded
    /// responses of the audit service and the actions of the audit administrator.
    /// For more information about the file format, read the documentation of the `audit_launch::manual` module.
    #[clap(short, long, value_parser)]
    pub session: Option<String>,

    /// (file path) Same as --session. Kept for scripts that pass the input file this way.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (file path, 'stdout' or empty) Where the report is written in JSON format. By default, it is printed
    /// to the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference report in JSON format. If provided, auditlaunch will check that the report of
    /// the session matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (milliseconds, default 0) The pause between two polls of the recorded background tasks.
    /// Overrides the pollIntervalMs value of the session file.
    #[clap(long, value_parser)]
    pub poll_interval_ms: Option<u64>,

    /// (default 600) The maximum number of polls while waiting on a background task.
    #[clap(long, value_parser)]
    pub max_ticks: Option<usize>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
