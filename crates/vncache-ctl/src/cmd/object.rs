//! `Get`/`AddOrUpdate`/`Delete`/`Dequeue` commands: each opens its own
//! handshake-then-upgrade connection, issues one (or, for `dequeue`, one
//! blocking) request, and prints the result.

use std::io::Write;

use anyhow::{Context, Result};

use vncache_client::{ChangeEventNotice, Client, MinimumBuffers};

use super::config::Config;

async fn connect(config: &Config) -> Result<Client> {
    let identity = config.identity()?;
    let negotiated = vncache_client::connect(
        &config.url,
        &config.connect_path,
        &identity,
        config.peer_id.clone(),
        None,
        &MinimumBuffers::default(),
    )
    .await
    .with_context(|| format!("failed to connect to {} — is the node running?", config.url))?;
    Ok(Client::new(negotiated.socket, negotiated.max_message_size))
}

pub async fn cmd_get(config: &Config, id: &str) -> Result<()> {
    let client = connect(config).await?;
    match client.get(id).await? {
        Some(data) => std::io::stdout().write_all(&data).context("failed to write to stdout")?,
        None => {
            eprintln!("not found: {id}");
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn cmd_set(config: &Config, id: &str, path: &str) -> Result<()> {
    let data = if path == "-" {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read(path).with_context(|| format!("failed to read {path}"))?
    };

    let client = connect(config).await?;
    client.add_or_update(id, &data).await?;
    println!("stored {} bytes under {id}", data.len());
    Ok(())
}

pub async fn cmd_rename(config: &Config, id: &str, new_id: &str, path: Option<&str>) -> Result<()> {
    let data = match path {
        Some(p) => std::fs::read(p).with_context(|| format!("failed to read {p}"))?,
        None => Vec::new(),
    };

    let client = connect(config).await?;
    client.rename_or_create(id, new_id, &data).await?;
    println!("{id} -> {new_id}");
    Ok(())
}

pub async fn cmd_delete(config: &Config, id: &str) -> Result<()> {
    let client = connect(config).await?;
    if client.delete(id).await? {
        println!("deleted {id}");
    } else {
        eprintln!("not found: {id}");
        std::process::exit(1);
    }
    Ok(())
}

pub async fn cmd_dequeue(config: &Config) -> Result<()> {
    let client = connect(config).await?;
    loop {
        match client.dequeue().await? {
            ChangeEventNotice::Deleted { id } => println!("deleted    {id}"),
            ChangeEventNotice::Modified { id, previous_id: Some(from) } => {
                println!("renamed    {from} -> {id}")
            }
            ChangeEventNotice::Modified { id, previous_id: None } => println!("modified   {id}"),
        }
    }
}
