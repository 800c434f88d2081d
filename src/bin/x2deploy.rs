// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use x2deploy::{
    config::{expand_path, DatabaseSettings, DeployConfig, RemoteSettings},
    path::default_registry_file,
    provision::Provisioner,
    registry::Registry,
    syscall::SystemExecutor,
    toggle::{FlagSetting, ToggleRequest, Toggler},
};

use anyhow::{Context, Result};
use clap::{builder::FalseyValueParser, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Password;
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "x2deploy [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(flatten)]
    pub options: DeployOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Refresh => run_refresh(self.options),
            Command::Install => run_install(self.options),
            Command::Deploy(opts) => run_deploy(self.options, opts),
            Command::Set(opts) => run_set(self.options, opts),
            Command::Get(opts) => run_get(self.options, opts),
            Command::Flags => run_flags(self.options),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Drop and recreate X2CRM database.
    #[command(override_usage = "x2deploy [options] refresh")]
    Refresh,

    /// Reinstall X2CRM from git checkout.
    #[command(override_usage = "x2deploy [options] install")]
    Install,

    /// Refresh database, reinstall, and set flags in one go.
    #[command(override_usage = "x2deploy [options] deploy [--no-refresh] [--set <key=value>]...")]
    Deploy(DeployRunOptions),

    /// Set flag values of installed copy.
    #[command(override_usage = "x2deploy [options] set <key=value>...")]
    Set(SetOptions),

    /// Print current value of flag in installed copy.
    #[command(override_usage = "x2deploy [options] get <key>")]
    Get(GetOptions),

    /// List known flags.
    #[command(override_usage = "x2deploy [options] flags")]
    Flags,
}

#[derive(Args, Clone, Debug)]
struct DeployOptions {
    /// Directory of X2CRM git repository.
    #[arg(short, long, global = true, env = "GITDIR", value_name = "path")]
    pub gitdir: Option<PathBuf>,

    /// Directory of working file set for X2CRM.
    #[arg(short, long, global = true, env = "WORKINGDIR", value_name = "path")]
    pub directory: Option<PathBuf>,

    /// User with the ability to drop and create its own database.
    #[arg(short = 'u', long, global = true, env = "MYSQLUSER", value_name = "user")]
    pub mysqluser: Option<String>,

    /// Password of MySQL user, prompted for when missing.
    #[arg(
        short = 'p',
        long,
        global = true,
        env = "MYSQLPASS",
        hide_env_values = true,
        value_name = "password"
    )]
    pub mysqlpass: Option<String>,

    /// Database name to install X2CRM into.
    #[arg(short = 'm', long, global = true, env = "MYSQLDATABASE", value_name = "name")]
    pub database: Option<String>,

    /// Install to remote server instead of local machine.
    #[arg(
        short = 'i',
        long,
        global = true,
        env = "INSTALLREMOTE",
        value_parser = FalseyValueParser::new()
    )]
    pub install_remote: bool,

    /// User to connect to remote server with.
    #[arg(short = 'l', long, global = true, env = "REMOTEUSER", value_name = "user")]
    pub remoteuser: Option<String>,

    /// Remote hostname to connect to.
    #[arg(short = 's', long, global = true, env = "REMOTESERVER", value_name = "host")]
    pub remoteserver: Option<String>,

    /// Remote web root that X2CRM is deployed to.
    #[arg(short = 'w', long, global = true, env = "REMOTEWEBROOT", value_name = "path")]
    pub remotewebroot: Option<PathBuf>,

    /// Owner to hand installed files to.
    #[arg(long, global = true, env = "WEBOWNER", value_name = "owner", default_value = "33")]
    pub owner: String,

    /// Run local file set manipulation without sudo.
    #[arg(long, global = true)]
    pub no_sudo: bool,

    /// Flag registry file to use instead of the built-in one.
    #[arg(long, global = true, value_name = "path")]
    pub registry: Option<PathBuf>,
}

impl DeployOptions {
    /// Build explicit deployment configuration.
    ///
    /// Prompts for MySQL password when database settings are needed, and no
    /// password was given.
    fn into_config(self, needs_database: bool) -> Result<DeployConfig> {
        let remote = if self.install_remote {
            Some(RemoteSettings {
                user: self
                    .remoteuser
                    .context("remote install needs --remoteuser or REMOTEUSER")?,
                server: self
                    .remoteserver
                    .context("remote install needs --remoteserver or REMOTESERVER")?,
                webroot: self
                    .remotewebroot
                    .context("remote install needs --remotewebroot or REMOTEWEBROOT")?,
            })
        } else {
            None
        };

        let database = match (needs_database, self.mysqluser, self.database) {
            (true, Some(user), Some(name)) => {
                let password = match self.mysqlpass {
                    Some(password) => password,
                    None => Password::new("MySQL password")
                        .without_confirmation()
                        .prompt()?,
                };
                Some(DatabaseSettings {
                    user,
                    password,
                    name,
                })
            }
            _ => None,
        };

        Ok(DeployConfig {
            gitdir: self.gitdir.map(expand_path).transpose()?,
            working_dir: self.directory.map(expand_path).transpose()?,
            database,
            remote,
            web_owner: self.owner,
        })
    }

    fn load_registry(&self) -> Result<Registry> {
        if let Some(path) = &self.registry {
            return Ok(Registry::load(expand_path(path)?)?);
        }

        if let Ok(path) = default_registry_file() {
            if path.is_file() {
                return Ok(Registry::load(path)?);
            }
        }

        Ok(Registry::builtin()?)
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployRunOptions {
    /// Keep existing database.
    #[arg(long)]
    pub no_refresh: bool,

    /// Flag to set after installing.
    #[arg(long = "set", value_name = "key=value")]
    pub settings: Vec<FlagSetting>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetOptions {
    /// Flags to set, in order.
    #[arg(required = true, value_name = "key=value")]
    pub settings: Vec<FlagSetting>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GetOptions {
    /// Flag to read.
    #[arg(required = true, value_name = "key")]
    pub key: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn with_spinner<T>(message: impl Into<String>, job: impl FnOnce() -> Result<T>) -> Result<T> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{elapsed_precise:.green}  {spinner} {msg}")?);
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    let result = job();
    bar.finish_and_clear();
    result
}

fn provisioner(opts: &DeployOptions) -> Provisioner {
    Provisioner::new(SystemExecutor::new()).with_sudo(!opts.no_sudo)
}

fn run_refresh(opts: DeployOptions) -> Result<()> {
    let provisioner = provisioner(&opts);
    let config = opts.into_config(true)?;
    let database = config.database()?;
    with_spinner(format!("refresh database {}", database.name), || {
        Ok(provisioner.refresh_database(database, &config.host_target())?)
    })
}

fn run_install(opts: DeployOptions) -> Result<()> {
    let provisioner = provisioner(&opts);
    let config = opts.into_config(false)?;
    provisioner.install(&config)?;

    Ok(())
}

fn run_deploy(opts: DeployOptions, run: DeployRunOptions) -> Result<()> {
    let provisioner = provisioner(&opts);
    let registry = opts.load_registry()?;
    let config = opts.into_config(!run.no_refresh)?;

    if !run.no_refresh {
        let database = config.database()?;
        with_spinner(format!("refresh database {}", database.name), || {
            Ok(provisioner.refresh_database(database, &config.host_target())?)
        })?;
    }

    provisioner.install(&config)?;

    let request = run.settings.into_iter().collect::<ToggleRequest>();
    if !request.is_empty() {
        let toggler = Toggler::new(&registry, SystemExecutor::new());
        toggler.apply(&config.app_target()?, &request)?;
    }

    info!("deployed to {}", config.app_target()?);
    Ok(())
}

fn run_set(opts: DeployOptions, set: SetOptions) -> Result<()> {
    let registry = opts.load_registry()?;
    let config = opts.into_config(false)?;
    let toggler = Toggler::new(&registry, SystemExecutor::new());
    let request = set.settings.into_iter().collect::<ToggleRequest>();
    toggler.apply(&config.app_target()?, &request)?;

    Ok(())
}

fn run_get(opts: DeployOptions, get: GetOptions) -> Result<()> {
    let registry = opts.load_registry()?;
    let config = opts.into_config(false)?;
    let toggler = Toggler::new(&registry, SystemExecutor::new());
    println!("{}", toggler.read(&config.app_target()?, get.key.as_str())?);

    Ok(())
}

fn run_flags(opts: DeployOptions) -> Result<()> {
    let registry = opts.load_registry()?;
    for descriptor in registry.iter() {
        println!(
            "{:<4}{:<34}{}",
            descriptor.key().as_str(),
            descriptor.target_path().to_string_lossy(),
            descriptor.description()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use x2deploy::target::ExecutionTarget;

    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        env::{current_dir, remove_var, set_var},
        fs::{create_dir_all, write},
    };

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("x2deploy").chain(args.iter().copied()))
            .expect("command line parses")
    }

    fn one_flag_registry(key: &str) -> String {
        format!("[[flag]]\nkey = \"{key}\"\npath = \"a.php\"\nlocator = \"(A = )(.*)\"\n")
    }

    #[sealed_test(env = [("INSTALLREMOTE", "1")])]
    fn install_remote_accepts_numeric_env() {
        assert!(parse(&["flags"]).options.install_remote);
    }

    #[sealed_test(env = [("INSTALLREMOTE", "0")])]
    fn install_remote_env_zero_means_local() {
        assert!(!parse(&["flags"]).options.install_remote);
        assert!(parse(&["-i", "flags"]).options.install_remote);
    }

    #[sealed_test]
    fn local_config_targets_app_subdir() -> anyhow::Result<()> {
        remove_var("INSTALLREMOTE");
        let cli = parse(&["-d", "/home/dev/x2work", "get", "d"]);
        let config = cli.options.into_config(false)?;

        assert_eq!(config.remote, None);
        assert_eq!(config.database, None);
        assert_eq!(
            config.app_target()?,
            ExecutionTarget::local("/home/dev/x2work/X2CRM/x2engine")
        );

        Ok(())
    }

    #[sealed_test]
    fn remote_config_targets_webroot() -> anyhow::Result<()> {
        let cli = parse(&[
            "-i", "-l", "deploy", "-s", "crm", "-w", "/var/www/x2", "set", "d=true",
        ]);
        let config = cli.options.into_config(false)?;

        assert_eq!(config.app_target()?.to_string(), "deploy@crm:/var/www/x2");
        assert_eq!(config.host_target().destination(), Some("deploy@crm".to_string()));

        Ok(())
    }

    #[sealed_test]
    fn remote_config_needs_every_remote_setting() {
        remove_var("REMOTEUSER");
        let cli = parse(&["-i", "-s", "crm", "-w", "/var/www/x2", "get", "d"]);
        let result = cli.options.into_config(false);
        assert!(result.is_err_and(|err| err.to_string().contains("--remoteuser")));
    }

    #[sealed_test]
    fn database_settings_only_when_needed() -> anyhow::Result<()> {
        let args = ["-u", "x2", "-p", "hunter2", "-m", "x2crm", "refresh"];

        let config = parse(&args).options.into_config(true)?;
        assert_eq!(config.database()?.name, "x2crm");
        assert_eq!(config.database()?.password, "hunter2");

        let config = parse(&args).options.into_config(false)?;
        assert_eq!(config.database, None);

        Ok(())
    }

    #[sealed_test]
    fn registry_lookup_order() -> anyhow::Result<()> {
        let config_home = current_dir()?.join("config");
        set_var("XDG_CONFIG_HOME", &config_home);

        let registry = parse(&["flags"]).options.load_registry()?;
        assert_eq!(registry.len(), 6);

        create_dir_all(config_home.join("x2deploy"))?;
        write(config_home.join("x2deploy/flags.toml"), one_flag_registry("user"))?;
        let registry = parse(&["flags"]).options.load_registry()?;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("user").is_some());

        write("custom.toml", one_flag_registry("custom"))?;
        let registry = parse(&["--registry", "custom.toml", "flags"])
            .options
            .load_registry()?;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("custom").is_some());

        Ok(())
    }
}
