//! VitaLink Client CLI
//!
//! Command-line front end for the secure records session. Each command opens
//! a session, performs one operation, and closes cleanly.
//!
//! The CLI provisions an ephemeral account identity per invocation and logs
//! its fingerprint; a deployment registers that key with the server through
//! its enrollment channel and supplies a persistent [`client::KeyStore`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client::{Config, MemoryKeyStore, Session};
use protocol::AccountIdentity;

/// VitaLink client - secure session to the records server.
#[derive(Parser, Debug)]
#[command(name = "vitalink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the client.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Authenticate and print the resolved profile
    Login {
        /// Account identifier
        email: String,
        /// Account password
        password: String,
    },

    /// List the patients assigned to the authenticated practitioner
    Patients {
        /// Account identifier
        email: String,
        /// Account password
        password: String,
    },

    /// List the recordings available for a patient
    Recordings {
        /// Account identifier
        email: String,
        /// Account password
        password: String,
        /// Patient to query
        patient_id: i64,
    },

    /// Fetch a recording and write its blob to disk
    Fetch {
        /// Account identifier
        email: String,
        /// Account password
        password: String,
        /// Recording to fetch
        signal_id: i64,
        /// Output path (defaults to the server-side filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a free-text annotation against a recording
    Annotate {
        /// Account identifier
        email: String,
        /// Account password
        password: String,
        /// Patient the recording belongs to
        patient_id: i64,
        /// Recording being annotated
        signal_id: i64,
        /// Annotation text
        comments: String,
    },

    /// Activate an account with a one-time password
    Activate {
        /// Account identifier
        email: String,
        /// One-time password delivered out of band
        one_time_password: String,
    },

    /// Change the account password
    ChangePassword {
        /// Account identifier
        email: String,
        /// Current password (authenticates the session)
        password: String,
        /// Replacement password
        new_password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.client.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Login { email, password } => {
            let session = open_session(&config, &email).await?;
            let login = session.authenticate(&email, &password).await?;
            println!("Logged in as {} (role: {})", login.email, login.role);
            println!("Profile #{}:", login.profile.id);
            for (field, value) in &login.profile.fields {
                println!("  {field}: {value}");
            }
            session.close().await;
        }

        Commands::Patients { email, password } => {
            let session = open_session(&config, &email).await?;
            let login = session.authenticate(&email, &password).await?;
            let patients = session.patients_of(login.profile.id).await?;
            println!("{} patient(s)", patients.len());
            for patient in patients {
                println!("  #{} {}", patient.id, serde_json::Value::Object(patient.fields));
            }
            session.close().await;
        }

        Commands::Recordings {
            email,
            password,
            patient_id,
        } => {
            let session = open_session(&config, &email).await?;
            session.authenticate(&email, &password).await?;
            let recordings = session.recordings_of(patient_id).await?;
            println!("{} recording(s) for patient {}", recordings.len(), patient_id);
            for recording in recordings {
                println!(
                    "  #{} {} {} Hz  {}",
                    recording.signal_id, recording.date, recording.sampling_rate, recording.comments
                );
            }
            session.close().await;
        }

        Commands::Fetch {
            email,
            password,
            signal_id,
            output,
        } => {
            let session = open_session(&config, &email).await?;
            session.authenticate(&email, &password).await?;
            let recording = session.fetch_recording(signal_id).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&recording.filename));
            std::fs::write(&path, &recording.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Recording #{} ({} bytes) written to {}",
                signal_id,
                recording.bytes.len(),
                path.display()
            );
            session.close().await;
        }

        Commands::Annotate {
            email,
            password,
            patient_id,
            signal_id,
            comments,
        } => {
            let session = open_session(&config, &email).await?;
            session.authenticate(&email, &password).await?;
            session
                .save_annotation(patient_id, signal_id, &comments)
                .await?;
            println!("Annotation saved for recording {signal_id}");
            session.close().await;
        }

        Commands::Activate {
            email,
            one_time_password,
        } => {
            let session = open_session(&config, &email).await?;
            let token = session.activate_account(&email, &one_time_password).await?;
            println!("Account activated; one-time token: {token}");
            session.close().await;
        }

        Commands::ChangePassword {
            email,
            password,
            new_password,
        } => {
            let session = open_session(&config, &email).await?;
            session.authenticate(&email, &password).await?;
            session.change_password(&email, &new_password).await?;
            println!("Password changed");
            session.close().await;
        }
    }

    Ok(())
}

/// Opens a session with a freshly provisioned identity for the account.
async fn open_session(config: &Config, account: &str) -> anyhow::Result<Session> {
    let identity = AccountIdentity::generate();
    tracing::info!(
        account,
        fingerprint = %identity.fingerprint(),
        "using ephemeral identity"
    );

    let keystore = Arc::new(MemoryKeyStore::new());
    keystore.insert_identity(account, identity);

    let session = Session::open(config, keystore, account)
        .await
        .with_context(|| {
            format!(
                "failed to open session to {}:{}",
                config.server.host, config.server.port
            )
        })?;
    Ok(session)
}
