use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use floating_clock_ipc::{Client, IpcError, SOCKET_PATH};
use std::path::PathBuf;
use std::time::Duration;

/// Longest duration the clock face can show (99:59)
const MAX_SECONDS: u64 = 99 * 60 + 59;

#[derive(Parser)]
#[command(name = "floating-clockctl")]
#[command(about = "Control the floating clock", long_about = None)]
struct Cli {
    /// Socket floating-clockd listens on
    #[arg(long, default_value = SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or stop the countdown
    Toggle,
    /// Print whether the countdown is running
    Running,
    /// Set the duration (MM:SS or seconds) and reset to it
    Set { time: String },
    /// Reset the countdown to its duration
    Reset,
    /// Print the remaining time
    Time,
    /// Print whether the clock is visible
    Visible {
        #[arg(short, long)]
        site: Option<String>,
    },
    /// Show the clock on a site
    Show {
        #[arg(short, long)]
        site: String,
    },
    /// Hide the clock on a site
    Hide {
        #[arg(short, long)]
        site: String,
    },
    /// Print whether the clock is asleep
    Suspended,
    /// Stop the countdown and hide the clock everywhere
    Sleep,
    /// Lift sleep mode
    Wake,
    /// Print everything at once
    Status {
        #[arg(short, long)]
        site: Option<String>,
    },
    /// Poll the remaining time once a second
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Commands::Watch = cli.command {
        watch(Poller::new(cli.socket)).await;
        return Ok(());
    }
    let mut client = Client::connect(&cli.socket).await?;

    match cli.command {
        Commands::Toggle => client.switch_timer().await?,
        Commands::Running => println!("{}", client.is_running().await?),
        Commands::Set { time } => {
            let seconds = parse_duration(&time)?;
            client.change_time(seconds).await?;
            println!("Duration set to {}", format_clock(seconds));
        }
        Commands::Reset => client.reset_time().await?,
        Commands::Time => println!("{}", format_clock(client.get_time().await?)),
        Commands::Visible { site } => println!("{}", client.is_visible(site).await?),
        Commands::Show { site } => client.set_visibility(true, Some(site)).await?,
        Commands::Hide { site } => client.set_visibility(false, Some(site)).await?,
        Commands::Suspended => println!("{}", client.is_suspended().await?),
        Commands::Sleep => client.set_suspended(true).await?,
        Commands::Wake => client.set_suspended(false).await?,
        Commands::Status { site } => {
            let suspended = client.is_suspended().await?;
            let visible = !suspended && client.is_visible(site).await?;
            println!("Time: {}", format_clock(client.get_time().await?));
            println!("Running: {}", client.is_running().await?);
            println!("Visible: {}", visible);
            println!("Asleep: {}", suspended);
        }
        // Polled above, without holding on to one connection
        Commands::Watch => {}
    }

    Ok(())
}

/// Polls the remaining time, reconnecting after the daemon goes away
struct Poller {
    socket: PathBuf,
    client: Option<Client>,
}

impl Poller {
    fn new(socket: PathBuf) -> Self {
        Self {
            socket,
            client: None,
        }
    }

    async fn poll(&mut self) -> Result<u64, IpcError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => Client::connect(&self.socket).await?,
        };
        let result = client.get_time().await;
        if !matches!(&result, Err(e) if e.is_transport()) {
            self.client = Some(client);
        }
        result
    }
}

/// Prints the time whenever it changes. A failed poll keeps the last
/// value on screen until the next one succeeds.
async fn watch(mut poller: Poller) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut shown = None;
    loop {
        interval.tick().await;
        match poller.poll().await {
            Ok(seconds) if shown != Some(seconds) => {
                println!("{}", format_clock(seconds));
                shown = Some(seconds);
            }
            Ok(_) => {}
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

/// Accepts `MM:SS` or plain seconds, clamped to what the clock can show.
fn parse_duration(input: &str) -> Result<u64> {
    let seconds = match input.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes = parse_part(minutes)?;
            let seconds = parse_part(seconds)?;
            if seconds > 59 {
                bail!("Use minutes >= 0 and seconds 0-59.");
            }
            minutes.saturating_mul(60).saturating_add(seconds)
        }
        None => parse_part(input)?,
    };
    Ok(seconds.min(MAX_SECONDS))
}

fn parse_part(part: &str) -> Result<u64> {
    let part = part.trim();
    if part.is_empty() {
        return Ok(0);
    }
    match part.parse() {
        Ok(value) => Ok(value),
        Err(_) => bail!("Enter valid numbers."),
    }
}

fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
