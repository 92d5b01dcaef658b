use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.freedesktop.Presence1",
    default_service = "org.freedesktop.Presence1",
    default_path = "/org/freedesktop/Presence1"
)]
trait Presence {
    async fn enroll(&self, subject_id: &str, name: &str, category: &str, image: &str) -> zbus::Result<String>;
    async fn recognize(&self, image: &str) -> zbus::Result<String>;
    async fn check_in(&self, image: &str) -> zbus::Result<String>;
    async fn list_subjects(&self) -> zbus::Result<String>;
    async fn list_attendance(&self, date: &str) -> zbus::Result<String>;
    async fn summary(&self, date: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presence", about = "Presence face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a subject from a face image
    Enroll {
        /// Unique subject identifier (e.g., employee number)
        #[arg(short, long)]
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Category such as a department
        #[arg(short, long, default_value = "")]
        category: String,
        /// Path to the face image
        image: PathBuf,
    },
    /// Identify a face without recording attendance
    Recognize {
        image: PathBuf,
    },
    /// Identify a face and record today's attendance
    CheckIn {
        image: PathBuf,
    },
    /// List enrolled subjects
    Subjects,
    /// List attendance records for a date
    Attendance {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Present/late/absent counts for a date
    Summary {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = PresenceProxy::new(&conn)
        .await
        .context("presenced is not reachable")?;

    let reply = match cli.command {
        Commands::Enroll {
            id,
            name,
            category,
            image,
        } => {
            let image = read_image(&image)?;
            proxy.enroll(&id, &name, &category, &image).await?
        }
        Commands::Recognize { image } => proxy.recognize(&read_image(&image)?).await?,
        Commands::CheckIn { image } => proxy.check_in(&read_image(&image)?).await?,
        Commands::Subjects => proxy.list_subjects().await?,
        Commands::Attendance { date } => proxy.list_attendance(date.as_deref().unwrap_or("")).await?,
        Commands::Summary { date } => proxy.summary(date.as_deref().unwrap_or("")).await?,
        Commands::Status => proxy.status().await?,
    };

    let body: serde_json::Value =
        serde_json::from_str(&reply).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if body["success"] != serde_json::Value::Bool(true) {
        tracing::debug!("daemon reported failure");
        std::process::exit(1);
    }
    Ok(())
}

/// Read an image file and encode it for the wire.
fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
