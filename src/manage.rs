//! `relaybot channels ...`: edit the monitored channel list from the shell.
//!
//! The running relay picks the change up through its config watcher.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::config::{parse_channel_ids, ConfigStore};

const USAGE: &str = "\
Usage: relaybot channels [--config PATH] <command>

Commands:
  list                 Show monitored channel ids
  add ID [NAME]        Start monitoring a channel, optionally saving its name
  remove ID            Stop monitoring a channel
  update ID,ID,...     Replace the whole list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    List,
    Add { id: i64, name: Option<String> },
    Remove(i64),
    Update(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelArgs {
    pub config_path: PathBuf,
    pub command: ChannelCommand,
}

/// Parse the arguments that follow `channels`.
pub fn parse_args(args: &[String]) -> Result<ChannelArgs> {
    let mut config_path = PathBuf::from("config.toml");
    let mut rest = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            let path = iter.next().context("--config needs a path")?;
            config_path = PathBuf::from(path);
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["list"] => ChannelCommand::List,
        ["add", id] => ChannelCommand::Add {
            id: parse_id(id)?,
            name: None,
        },
        ["add", id, name @ ..] => ChannelCommand::Add {
            id: parse_id(id)?,
            name: Some(name.join(" ")),
        },
        ["remove", id] => ChannelCommand::Remove(parse_id(id)?),
        ["update", ids @ ..] if !ids.is_empty() => {
            ChannelCommand::Update(parse_channel_ids(&ids.join(","))?)
        }
        _ => bail!("{USAGE}"),
    };

    Ok(ChannelArgs {
        config_path,
        command,
    })
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("Invalid channel id: {raw}"))
}

/// Apply a command to the current list. `List` returns it unchanged.
pub fn apply(current: &[i64], command: &ChannelCommand) -> Result<Vec<i64>> {
    let mut ids = current.to_vec();
    match command {
        ChannelCommand::List => {}
        ChannelCommand::Add { id, .. } => {
            if ids.contains(id) {
                bail!("Channel {id} is already monitored");
            }
            ids.push(*id);
        }
        ChannelCommand::Remove(id) => {
            if !ids.contains(id) {
                bail!("Channel {id} is not monitored");
            }
            ids.retain(|existing| existing != id);
        }
        ChannelCommand::Update(new_ids) => ids = new_ids.clone(),
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

pub fn run(args: &[String]) -> Result<()> {
    let ChannelArgs {
        config_path,
        command,
    } = parse_args(args)?;

    let store = ConfigStore::new(&config_path);
    let current = store.channel_ids()?;
    let ids = apply(&current, &command)?;

    match &command {
        ChannelCommand::List => {}
        ChannelCommand::Add { id, name } => {
            store.save_channel_ids(&ids)?;
            match name {
                Some(name) => {
                    store.save_channel_name(*id, name)?;
                    println!("Added channel {id} ({name})");
                }
                None => println!("Added channel {id}"),
            }
        }
        ChannelCommand::Remove(id) => {
            store.save_channel_ids(&ids)?;
            println!("Removed channel {id}");
        }
        ChannelCommand::Update(_) => {
            store.save_channel_ids(&ids)?;
            println!("Channel list replaced");
        }
    }

    println!(
        "{} channel(s) monitored in {}:",
        ids.len(),
        store.path().display()
    );
    for id in &ids {
        println!("  {id}");
    }
    Ok(())
}
