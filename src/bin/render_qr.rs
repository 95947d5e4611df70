//! render-qr - write a student's QR code to a PNG file
//!
//! Usage:
//!   render-qr <subject-id> <out.png> [size]   render locally
//!   render-qr --fetch <out.png>               download the signed-in student's code

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attendance_checkin::{
    api::{AttendanceBackend, Credentials, HttpBackend},
    config::Config,
    services::{IdentityCodec, QrRenderService},
};

const CONFIG_PATH: &str = "checkin.yml";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Render {
        subject_id: String,
        out: PathBuf,
        size: Option<u32>,
    },
    Fetch {
        out: PathBuf,
    },
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args {
        [flag, out] if flag == "--fetch" => Ok(Command::Fetch { out: out.into() }),
        [subject_id, out] => Ok(Command::Render {
            subject_id: subject_id.clone(),
            out: out.into(),
            size: None,
        }),
        [subject_id, out, size] => Ok(Command::Render {
            subject_id: subject_id.clone(),
            out: out.into(),
            size: Some(size.parse().with_context(|| format!("Invalid size: {}", size))?),
        }),
        _ => bail!("usage: render-qr <subject-id> <out.png> [size] | render-qr --fetch <out.png>"),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_checkin=info,render_qr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let config = Config::load_with_env(Path::new(CONFIG_PATH))?;

    match command {
        Command::Render {
            subject_id,
            out,
            size,
        } => {
            // only render payloads the scanner would accept
            let codec = IdentityCodec::from_config(&config.scanner)?;
            let payload = codec.encode(&subject_id)?;

            let renderer = QrRenderService::new(&config.render);
            let size = size.unwrap_or_else(|| renderer.default_size());
            let png = renderer.render(&payload, size).await?;
            write_file(&out, &png).await?;
            tracing::info!("Wrote {} ({}px)", out.display(), size);
        }
        Command::Fetch { out } => {
            let credentials =
                Credentials::resolve(&config.api).context("Failed to read API token")?;
            let backend = HttpBackend::new(&config.api, credentials)?;

            let qr = backend.fetch_my_qr_code().await?;
            let png = qr.image_bytes()?;
            write_file(&out, &png).await?;
            tracing::info!(
                "Wrote QR code for {} to {}",
                qr.student_name.as_deref().unwrap_or("current student"),
                out.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_render() {
        assert_eq!(
            parse_args(&args(&["STU-42", "out.png", "512"])).unwrap(),
            Command::Render {
                subject_id: "STU-42".into(),
                out: "out.png".into(),
                size: Some(512),
            }
        );
        assert_eq!(
            parse_args(&args(&["STU-42", "out.png"])).unwrap(),
            Command::Render {
                subject_id: "STU-42".into(),
                out: "out.png".into(),
                size: None,
            }
        );
    }

    #[test]
    fn test_parse_fetch() {
        assert_eq!(
            parse_args(&args(&["--fetch", "me.png"])).unwrap(),
            Command::Fetch { out: "me.png".into() }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["STU-42", "out.png", "big"])).is_err());
    }
}
