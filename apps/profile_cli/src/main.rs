use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, normalize_base_url},
    FileBlob, ProfileClient, ProgressEvent,
};
use futures::StreamExt;
use shared::domain::{Credential, PendingFormEdits};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Profile maintenance against the listing API")]
struct Args {
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    storage_base_url: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Change username, email or password.
    Update {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        new_email: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
    },
    /// Upload an image and make it the profile avatar.
    Avatar { path: PathBuf },
    Delete,
    SignOut,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = &args.api_base_url {
        settings.api_base_url = normalize_base_url(url);
    }
    if let Some(url) = &args.storage_base_url {
        settings.storage_base_url = normalize_base_url(url);
    }
    let client = ProfileClient::from_settings(&settings)?;

    let identity = client.sign_in(&args.email, &args.password).await?;
    println!("Signed in as {} ({})", identity.username, identity.id);

    match args.command {
        Command::Update {
            username,
            new_email,
            new_password,
        } => {
            client.edit(PendingFormEdits {
                username,
                email: new_email,
                password: new_password.map(Credential::new),
                avatar: None,
            });
            if client.edits().is_empty() {
                bail!("nothing to update: pass --username, --new-email or --new-password");
            }
            let updated = client.submit_profile().await?;
            println!("User is updated successfully: {} <{}>", updated.username, updated.email);
        }
        Command::Avatar { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "avatar".to_string());
            let content_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();

            let mut upload = client.select_avatar(FileBlob::new(filename, content_type, bytes));
            let generation = upload.generation();
            while let Some(event) = upload.next().await {
                client.apply_upload_event(generation, &event);
                match event {
                    ProgressEvent::Progress(percent) => println!("Uploading {percent}%"),
                    ProgressEvent::Failure(failure) => bail!("image upload failed: {failure}"),
                    ProgressEvent::Completed(reference) => {
                        println!("Image successfully uploaded: {reference}")
                    }
                }
            }

            let updated = client.submit_profile().await?;
            if let Some(avatar) = &updated.avatar {
                println!("Avatar is now {avatar}");
            }
        }
        Command::Delete => {
            client.delete_account().await?;
            println!("Account deleted");
        }
        Command::SignOut => {
            client.sign_out().await?;
            println!("Signed out");
        }
    }

    println!("Session status: {:?}", client.session().snapshot().status);
    Ok(())
}
