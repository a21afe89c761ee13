use crate::coordinator::Router;
use crate::error::Error;
use serde::Serialize;
use tokio_postgres::Client;

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Report {
    ///
    /// Entries that have waited longest, locked or not
    ///
    Oldest {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    ///
    /// Entries currently held under a temporary claim
    ///
    Claimed,

    ///
    /// Jurisdictions with at least one unlocked entry
    ///
    Jurisdictions,
}

impl Report {
    pub async fn run(&self, router: &Router, client: &Client) -> Result<(), Error> {
        match self {
            Report::Oldest { limit } => print(&router.oldest(client, *limit).await?),
            Report::Claimed => print(&router.list_claimed(client).await?),
            Report::Jurisdictions => print(&router.jurisdictions_with_unclaimed(client).await?),
        }
    }
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
