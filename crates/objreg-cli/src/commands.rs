use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use objreg_core::{Registry, RegistryConfig};
use objreg_projection::{EntryKind, VirtualNamespace};

use crate::cli::*;
use crate::manifest::{Manifest, DEMO};

struct Session {
    registry: Registry,
    namespace: Arc<VirtualNamespace>,
}

impl Session {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => RegistryConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RegistryConfig::default(),
        };
        let namespace = Arc::new(VirtualNamespace::from_config(&config.projection));
        let registry = Registry::with_projection(config, namespace.clone())?;
        let manifest = match &cli.manifest {
            Some(path) => Manifest::load(path)?,
            None => Manifest::demo()?,
        };
        manifest.apply(&registry)?;
        Ok(Self {
            registry,
            namespace,
        })
    }

    fn require_projection(&self) -> anyhow::Result<()> {
        if !self.registry.config().projection.enabled {
            bail!("projection is disabled in the configuration");
        }
        Ok(())
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Demo = cli.command {
        print!("{}", DEMO.trim_start());
        return Ok(());
    }

    let session = Session::open(&cli)?;
    match &cli.command {
        Command::Dump => cmd_dump(&session, &cli.format),
        Command::Tree(args) => cmd_tree(&session, args),
        Command::Ls(args) => cmd_ls(&session, args),
        Command::Read(args) => cmd_read(&session, args),
        Command::Write(args) => cmd_write(&session, args),
        Command::Types => cmd_types(&session),
        Command::Check => cmd_check(&session),
        Command::Demo => Ok(()),
    }
}

fn cmd_dump(session: &Session, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", session.registry.dump_registry()),
        OutputFormat::Json => println!("{}", session.registry.snapshot().to_json()?),
    }
    Ok(())
}

fn cmd_tree(session: &Session, args: &TreeArgs) -> anyhow::Result<()> {
    session.require_projection()?;
    let registry = args.values.then_some(&session.registry);
    print!("{}", session.namespace.render(registry));
    Ok(())
}

fn cmd_ls(session: &Session, args: &LsArgs) -> anyhow::Result<()> {
    session.require_projection()?;
    let path = args
        .path
        .clone()
        .unwrap_or_else(|| session.namespace.mount_point().to_string());
    for entry in session.namespace.list(&path)? {
        match entry.kind {
            EntryKind::Directory => println!("{}/", entry.name.blue().bold()),
            EntryKind::Attribute => println!("{}", entry.name),
            EntryKind::Link => {
                let target = session
                    .namespace
                    .resolve_link(&format!("{}/{}", path.trim_end_matches('/'), entry.name))
                    .unwrap_or_else(|_| "?".into());
                println!("{} -> {}", entry.name.cyan(), target.dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_read(session: &Session, args: &ReadArgs) -> anyhow::Result<()> {
    session.require_projection()?;
    println!("{}", session.namespace.read(&args.path, &session.registry)?);
    Ok(())
}

fn cmd_write(session: &Session, args: &WriteArgs) -> anyhow::Result<()> {
    session.require_projection()?;
    session
        .namespace
        .write(&args.path, &args.value, &session.registry)?;
    let now = session.namespace.read(&args.path, &session.registry)?;
    println!("{} {} = {}", "✓".green().bold(), args.path.bold(), now.yellow());
    Ok(())
}

fn cmd_types(session: &Session) -> anyhow::Result<()> {
    for tag in session.registry.data_type_tags() {
        println!("{}", tag.cyan());
    }
    Ok(())
}

fn cmd_check(session: &Session) -> anyhow::Result<()> {
    let loaded = session.registry.len();
    session.registry.clear()?;
    println!(
        "{} Loaded {} objects and tore them down; {} roots remain",
        "✓".green().bold(),
        loaded.to_string().bold(),
        session.registry.len()
    );
    Ok(())
}
