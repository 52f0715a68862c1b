use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Turns Reddit threads into narrated vertical videos")]
pub struct Args {
    /// Created with defaults when missing.
    #[clap(long, default_value = "config/config.toml")]
    pub config: PathBuf,

    /// Overrides `reddit.subreddit`.
    #[clap(long)]
    pub subreddit: Option<String>,

    /// Overrides `reddit.post_id`; join several ids with `+`.
    #[clap(long)]
    pub post_id: Option<String>,

    /// How many videos to make from the subreddit listing.
    #[clap(long, default_value_t = 1)]
    pub times: usize,

    /// Hide the render progress bars.
    #[clap(long)]
    pub no_progress: bool,

    /// Print the available voices and exit.
    #[clap(long)]
    pub list_voices: bool,

    /// Debug logging unless RUST_LOG says otherwise.
    #[clap(short, long)]
    pub verbose: bool,
}
