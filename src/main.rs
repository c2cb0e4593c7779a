use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use log::info;
use venvlink::application::{InstallOptions, PythonChoice, ReinstallOptions, Workspace};
use venvlink::commands;
use venvlink::config::{Config, Options, default_flags, path_check};
use venvlink::process::RealCommandRunner;
use venvlink::runtime::RealRuntime;
use venvlink::tool::Uv;

/// venvlink - install Python applications into isolated environments
///
/// Each application gets its own virtual environment built by uv; its
/// executables and man pages are exposed through symlinks in shared
/// directories.
///
/// Default options may be placed in the venvlink-flags.conf file in the
/// user configuration directory.
#[derive(Parser, Debug)]
#[command(author, version = env!("VENVLINK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Root of the package links and environments
    #[arg(long, env = "VENVLINK_HOME", value_name = "PATH", global = true)]
    home: Option<String>,

    /// Directory receiving executable links
    #[arg(long, env = "VENVLINK_BIN_DIR", value_name = "PATH", global = true)]
    bin_dir: Option<String>,

    /// Directory receiving man page links
    #[arg(long, env = "VENVLINK_MAN_DIR", value_name = "PATH", global = true)]
    man_dir: Option<String>,

    /// Interpreter used for new environments
    #[arg(
        long,
        env = "VENVLINK_DEFAULT_PYTHON",
        value_name = "PYTHON",
        global = true
    )]
    default_python: Option<String>,

    /// uv executable
    #[arg(long, env = "VENVLINK_UV", value_name = "PATH", global = true)]
    uv: Option<String>,

    /// Do not link man pages
    #[arg(short = 'm', long, global = true)]
    no_man_pages: bool,

    /// Show progress and installer output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install applications into new environments
    Install(InstallArgs),

    /// Install extra packages into an application's environment
    Inject(InjectArgs),

    /// Remove injected packages from an application's environment
    Uninject(InjectArgs),

    /// Recreate environments from their recorded dependencies
    Reinstall(ReinstallArgs),

    /// Upgrade applications and their injected packages
    Upgrade(SelectionArgs),

    /// Uninstall applications and remove their environments
    Uninstall(SelectionArgs),

    /// List installed applications
    List(ListArgs),

    /// Show environment paths of installed applications
    Venv(VenvArgs),

    /// Run uv pip against an application's environment
    Runpip(RunpipArgs),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Interpreter path or version for the new environment
    #[arg(short, long, value_name = "PYTHON")]
    python: Option<String>,

    /// Replace an application that is already installed
    #[arg(short, long)]
    force: bool,

    /// Install project directories in editable mode
    #[arg(short, long)]
    editable: bool,

    /// Also link executables of dependencies
    #[arg(short = 'd', long)]
    include_deps: bool,

    /// Give the environment access to the system site-packages
    #[arg(long)]
    system_site_packages: bool,

    /// Package index to install from
    #[arg(short, long, value_name = "URL")]
    index_url: Option<String>,

    /// Requirement specifiers or project paths
    #[arg(required = true, value_name = "PACKAGE")]
    packages: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct InjectArgs {
    /// Installed application name or editable path
    #[arg(value_name = "PACKAGE")]
    package: String,

    /// Extra packages
    #[arg(required = true, value_name = "EXTRA")]
    extras: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct SelectionArgs {
    /// Select all installed applications
    #[arg(long)]
    all: bool,

    /// With --all, exclude the named applications
    #[arg(long, requires = "all")]
    skip: bool,

    /// Application names or editable paths
    #[arg(value_name = "PACKAGE")]
    packages: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ReinstallArgs {
    /// Interpreter path for the new environment
    #[arg(short, long, value_name = "PATH", conflicts_with_all = ["pyenv", "reset_python"])]
    python: Option<String>,

    /// Interpreter version for the new environment
    #[arg(short = 'P', long, value_name = "VERSION", conflicts_with = "reset_python")]
    pyenv: Option<String>,

    /// Forget the recorded interpreter and use the default
    #[arg(long)]
    reset_python: bool,

    /// Give the environment access to the system site-packages
    #[arg(long, conflicts_with = "no_system_site_packages")]
    system_site_packages: bool,

    /// Remove access to the system site-packages
    #[arg(long)]
    no_system_site_packages: bool,

    #[command(flatten)]
    selection: SelectionArgs,
}

impl ReinstallArgs {
    fn options(&self) -> ReinstallOptions {
        let python = if let Some(path) = &self.python {
            PythonChoice::Path(path.clone())
        } else if let Some(version) = &self.pyenv {
            PythonChoice::Version(version.clone())
        } else if self.reset_python {
            PythonChoice::Reset
        } else {
            PythonChoice::Keep
        };
        let system_site = if self.system_site_packages {
            Some(true)
        } else if self.no_system_site_packages {
            Some(false)
        } else {
            None
        };
        ReinstallOptions {
            python,
            system_site,
        }
    }
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// Print a JSON object keyed by application name
    #[arg(long)]
    json: bool,

    /// Application names or editable paths
    #[arg(value_name = "PACKAGE")]
    packages: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct VenvArgs {
    /// Do not abbreviate the home directory as ~
    #[arg(short, long)]
    path_full: bool,

    /// Order by environment number instead of name
    #[arg(short, long)]
    sort_venv: bool,

    /// Application names or editable paths
    #[arg(value_name = "PACKAGE")]
    packages: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct RunpipArgs {
    /// Application name or editable path
    #[arg(value_name = "PACKAGE")]
    package: String,

    /// Arguments passed to uv pip
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            home: self.home.clone(),
            bin_dir: self.bin_dir.clone(),
            man_dir: self.man_dir.clone(),
            default_python: self.default_python.clone(),
            uv: self.uv.clone(),
            no_man_pages: self.no_man_pages,
            verbose: self.verbose,
        }
    }
}

/// Command line with the default flags inserted after the program name.
fn command_line(defaults: Vec<String>) -> Vec<String> {
    let mut args = std::env::args();
    let mut line: Vec<String> = args.next().into_iter().collect();
    line.extend(defaults);
    line.extend(args);
    line
}

fn print_environment(config: &Config) {
    println!();
    println!("Environment:");
    println!("  VENVLINK_HOME = {}", config.home.display());
    println!("  VENVLINK_BIN_DIR = {}", config.bin_dir.display());
    println!("  VENVLINK_MAN_DIR = {}", config.man_dir_setting.display());
    println!("  VENVLINK_DEFAULT_PYTHON = {}", config.default_python);
    println!("  VENVLINK_UV = {}", config.uv);
    println!();
    let path = std::env::var("PATH").ok();
    println!(
        "{}",
        path_check("VENVLINK_BIN_DIR", &config.bin_dir, path.as_deref())
    );
}

/// Run `op` for every name. A single failure is returned as is; with several
/// names the remaining ones are still processed.
fn for_each_package(names: &[String], mut op: impl FnMut(&str) -> Result<()>) -> Result<()> {
    if let [name] = names {
        return op(name);
    }

    let mut failed = Vec::new();
    for name in names {
        if let Err(e) = op(name) {
            eprintln!("Error: {}: {:#}", name, e);
            failed.push(name.as_str());
        }
    }
    if !failed.is_empty() {
        bail!("Failed for {}", failed.join(", "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let runtime = RealRuntime;
    let cli = Cli::parse_from(command_line(default_flags(&runtime)));

    let filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = Config::resolve(&runtime, cli.options())?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        print_environment(&config);
        return Ok(());
    };

    let uv = Uv::new(config.uv.clone(), RealCommandRunner, config.verbose);
    let version = uv.check_version()?;
    info!("Using {} {}", uv.program(), version);

    let mut ws = Workspace::open(&runtime, &uv, &config)?;

    match command {
        Commands::Install(args) => {
            let options = InstallOptions {
                python: args.python,
                force: args.force,
                editable: args.editable,
                include_deps: args.include_deps,
                system_site_packages: args.system_site_packages,
                index_url: args.index_url,
            };
            ws.install(&args.packages, &options)?;
        }
        Commands::Inject(args) => {
            let name = ws.find(&args.package)?.name;
            let apps = ws.inject(&name, &args.extras)?;
            println!("Injected {} into {}.", args.extras.join(" "), name);
            info!("Linked apps: {}", apps.join(", "));
        }
        Commands::Uninject(args) => {
            let name = ws.find(&args.package)?.name;
            ws.uninject(&name, &args.extras)?;
            println!("Uninjected {} from {}.", args.extras.join(" "), name);
        }
        Commands::Reinstall(args) => {
            let options = args.options();
            let s = &args.selection;
            let names = ws.select(&s.packages, s.all, s.skip)?;
            for_each_package(&names, |name| ws.reinstall(name, &options))?;
        }
        Commands::Upgrade(s) => {
            let names = ws.select(&s.packages, s.all, s.skip)?;
            for_each_package(&names, |name| ws.upgrade(name))?;
        }
        Commands::Uninstall(s) => {
            let names = ws.select(&s.packages, s.all, s.skip)?;
            for_each_package(&names, |name| ws.uninstall(name))?;
        }
        Commands::List(args) => commands::list(&ws, &args.packages, args.json)?,
        Commands::Venv(args) => {
            commands::venv(&ws, &args.packages, args.path_full, args.sort_venv)?
        }
        Commands::Runpip(args) => commands::runpip(&ws, &args.package, &args.args)?,
    }
    Ok(())
}
