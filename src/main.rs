use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use ocitree::manager::{CloneOptions, FetchOptions, Manager};
use ocitree::notifier::Notifier;
use ocitree::reference::{LocalRef, Name, Reference, RelativeRef, RemoteRef, Tag};
use ocitree::repository::{AddOptions, ExecOptions};
use ocitree::store::LocalStore;

#[derive(Parser)]
#[command(
    name = "ocitree",
    author,
    version,
    about = "Manage local OCI/Docker images like version-controlled source trees"
)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace)"
    )]
    verbose: u8,

    #[arg(
        long,
        global = true,
        help = "Store root directory (defaults to $OCITREE_STORE or $HOME/.ocitree)"
    )]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Clone a remote repository into local storage")]
    Clone {
        #[arg(help = "Remote reference to clone (e.g. alpine:latest)")]
        reference: String,
    },

    #[command(about = "Update the references of a local repository")]
    Fetch {
        #[arg(help = "Remote reference to fetch")]
        reference: String,
    },

    #[command(about = "List local repositories")]
    List,

    #[command(about = "Show commit logs")]
    Log {
        #[arg(help = "Repository name")]
        name: String,
    },

    #[command(about = "Move the repository HEAD to another reference")]
    Checkout {
        #[arg(help = "Local reference to move HEAD to")]
        reference: String,
    },

    #[command(about = "Commit files to the HEAD of a repository")]
    Add {
        #[arg(help = "Repository name")]
        name: String,
        #[arg(help = "Destination path inside the image")]
        dest: String,
        #[arg(required = true, help = "Source files or directories")]
        sources: Vec<String>,
        #[arg(long, default_value = "", help = "Ownership spec for the added content")]
        chown: String,
        #[arg(long, default_value = "", help = "Permissions for the added content (octal)")]
        chmod: String,
        #[arg(short, long, default_value = "", help = "Commit message")]
        message: String,
    },

    #[command(about = "Run a command in the repository and commit the result")]
    Exec {
        #[arg(help = "Repository name")]
        name: String,
        #[arg(help = "Command to execute")]
        command: String,
        #[arg(trailing_var_arg = true, help = "Command arguments")]
        args: Vec<String>,
        #[arg(short, long, default_value = "", help = "Commit message")]
        message: String,
    },

    #[command(about = "Run a shell command in the repository and commit the result")]
    Run {
        #[arg(help = "Repository name")]
        name: String,
        #[arg(help = "Shell command passed to /bin/sh -c")]
        command: String,
        #[arg(short, long, default_value = "", help = "Commit message")]
        message: String,
    },

    #[command(about = "Reapply commits on top of the given reference")]
    Rebase {
        #[arg(help = "Reference to rebase onto; relative offsets are allowed (e.g. NAME~2)")]
        reference: String,
        #[arg(
            short,
            long,
            help = "Edit the commit list before rebasing"
        )]
        interactive: bool,
    },

    #[command(about = "Add or remove tags on the HEAD of a repository")]
    Tag {
        #[arg(help = "Repository name")]
        name: String,
        #[arg(required = true, help = "Tags to add or remove")]
        tags: Vec<String>,
        #[arg(short, long, help = "Delete tags instead of adding them")]
        delete: bool,
    },

    #[command(about = "Mount the repository HEAD and print the mountpoint")]
    Mount {
        #[arg(help = "Repository name")]
        name: String,
    },

    #[command(about = "Unmount the repository HEAD")]
    Umount {
        #[arg(help = "Repository name")]
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let notifier = Notifier::new(cli.verbose);
    let root = store_root(cli.store.as_deref());
    notifier.debug(&format!("store root: {}", root.display()));

    let store = LocalStore::open(&root)
        .with_context(|| format!("failed to open store at {}", root.display()))?;
    let manager = Manager::new(store);

    let result = dispatch(cli.command, &manager, &notifier);
    notifier.finish_spinner();
    result
}

fn dispatch(command: Command, manager: &Manager<LocalStore>, notifier: &Notifier) -> Result<()> {
    match command {
        Command::Clone { reference } => {
            let remote = RemoteRef::parse(&reference)?;
            notifier.info(&format!("Cloning repository {remote}..."));
            manager.clone_repository(&remote, &CloneOptions::default())?;
            notifier.info(&format!("Cloned {remote}"));
        }

        Command::Fetch { reference } => {
            let remote = RemoteRef::parse(&reference)?;
            notifier.info(&format!("Fetching references of {}...", remote.name()));
            manager.fetch(&remote, &FetchOptions::default())?;
        }

        Command::List => {
            for repository in manager.repositories()? {
                let tags = repository.head_other_tags();
                if tags.is_empty() {
                    println!("{}", repository.name());
                } else {
                    println!("{} [{}]", repository.name(), tags.join(", "));
                }
            }
        }

        Command::Log { name } => {
            let name = Name::parse(&name)?;
            let repository = manager
                .repository(&name)
                .with_context(|| format!("failed to retrieve repository {name:?}"))?;
            let commits = repository
                .commits()
                .with_context(|| format!("failed to list commits of {name:?}"))?;

            println!("{name}");
            for commit in commits.iter() {
                println!(
                    "commit {} ({}) {:?}",
                    commit.id(),
                    human_size(commit.size()),
                    commit.tags()
                );
                if let Some(created) = commit.creation_time() {
                    println!("Date {}", created.format("%a %b %d %H:%M:%S %z %Y"));
                }
                let message = commit.message().trim_end();
                if !message.is_empty() {
                    println!("\t{message}");
                }
                println!("\t{}\n", commit.created_by());
            }
        }

        Command::Checkout { reference } => {
            let local = LocalRef::parse(&reference)?;
            let mut repository = manager.repository(local.name())?;
            repository.checkout(&Reference::from(local.clone()))?;
            notifier.info(&format!("HEAD is now at {local}"));
        }

        Command::Add {
            name,
            dest,
            sources,
            chown,
            chmod,
            message,
        } => {
            let name = Name::parse(&name)?;
            let mut repository = manager.repository(&name)?;
            repository.add(
                &dest,
                AddOptions {
                    chmod,
                    chown,
                    message,
                },
                &sources,
            )?;
        }

        Command::Exec {
            name,
            command,
            args,
            message,
        } => {
            let name = Name::parse(&name)?;
            let mut repository = manager.repository(&name)?;
            repository.exec(
                ExecOptions {
                    message,
                    quiet: false,
                },
                &command,
                &args,
            )?;
        }

        Command::Run {
            name,
            command,
            message,
        } => {
            let name = Name::parse(&name)?;
            let mut repository = manager.repository(&name)?;
            repository.exec(
                ExecOptions {
                    message,
                    quiet: false,
                },
                "/bin/sh",
                &["-c".to_string(), command],
            )?;
        }

        Command::Rebase {
            reference,
            interactive,
        } => {
            let relative = RelativeRef::parse(&reference)?;
            let resolved = manager
                .resolve_relative_reference(&relative)
                .context("failed to resolve relative reference")?;
            let Some(name) = resolved.name().cloned() else {
                bail!("reference {resolved} names no repository");
            };

            let mut repository = manager
                .repository(&name)
                .context("repository not found")?;
            let mut session = repository
                .rebase_session(&resolved)
                .with_context(|| format!("failed to start rebase session using reference {relative}"))?;

            if interactive {
                session.interactive_edit()?;
            }
            if session.commits().is_empty() {
                notifier.info("Nothing to rebase");
            }
            session.apply().context("failed to apply rebase")?;
            notifier.info(&format!("HEAD rebased onto {resolved}"));
        }

        Command::Tag { name, tags, delete } => {
            let name = Name::parse(&name)?;
            let parsed: Vec<Tag> = tags
                .iter()
                .map(|tag| Tag::parse(tag).with_context(|| format!("tag {tag:?} invalid")))
                .collect::<Result<_>>()?;

            let mut repository = manager.repository(&name)?;
            let action = if delete { "remove" } else { "add" };
            let mut failures = 0usize;
            for tag in &parsed {
                let result = if delete {
                    repository.remove_tag(tag)
                } else {
                    repository.add_tag(tag)
                };
                if let Err(err) = result {
                    log::error!("failed to {action} tag {tag:?}: {err:#}");
                    failures += 1;
                }
            }
            if failures > 0 {
                bail!("failed to {action} {failures} tag(s)");
            }
        }

        Command::Mount { name } => {
            let name = Name::parse(&name)?;
            let repository = manager.repository(&name)?;
            let mountpoint = repository.mount()?;
            println!("{}", mountpoint.display());
        }

        Command::Umount { name } => {
            let name = Name::parse(&name)?;
            let repository = manager.repository(&name)?;
            repository.unmount()?;
        }
    }

    Ok(())
}

/// Store root resolution: flag, then `$OCITREE_STORE`, then `$HOME/.ocitree`.
fn store_root(flag: Option<&std::path::Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os("OCITREE_STORE") {
        return PathBuf::from(path);
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".ocitree");
    }
    PathBuf::from(".ocitree")
}

fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size.abs() >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
