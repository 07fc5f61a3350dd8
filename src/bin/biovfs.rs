use std::io::Write;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use biodata_vfs::manager::Manager;
use biodata_vfs::resolver::ResolveFlags;
use biodata_vfs::vfile::read_all_at;
use biodata_vfs::VfsError;

#[derive(Parser)]
#[command(name = "biovfs")]
#[command(about = "Open bioinformatics data by path, URL, or accession")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Parse a path/URL/accession and show its classification")]
    Parse(PathArg),
    #[command(about = "Stream a file to stdout, decrypting if needed")]
    Cat(CatArgs),
    #[command(about = "List a directory or mounted archive")]
    Ls(LsArgs),
    #[command(about = "Resolve a path or accession to its concrete location")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct PathArg {
    uri: String,
}

#[derive(Args)]
struct CatArgs {
    uri: String,

    #[arg(long)]
    decrypt: bool,
}

#[derive(Args)]
struct LsArgs {
    uri: String,

    #[arg(long)]
    decrypt: bool,
}

#[derive(Args)]
struct ResolveArgs {
    uri: String,

    #[arg(long)]
    kdb_acc: bool,

    #[arg(long)]
    no_local: bool,

    #[arg(long)]
    no_remote: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(vfs) = report.downcast_ref::<VfsError>() {
            return ExitCode::from(map_exit_code(vfs));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &VfsError) -> u8 {
    match error {
        err if err.is_not_found() => 2,
        VfsError::Http(_) | VfsError::HttpStatus { .. } => 3,
        VfsError::EncryptionKeyNotFound
        | VfsError::EncryptionKeyInvalid(_)
        | VfsError::EncryptionIncorrect => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manager = Manager::shared().into_diagnostic()?;

    match cli.command {
        Commands::Parse(args) => {
            let path = manager.make_path(&args.uri).into_diagnostic()?;
            println!("scheme:    {}", path.scheme().unwrap_or(""));
            println!("type:      {:?}", path.uri_type());
            println!("path type: {:?}", path.path_type());
            if !path.host().is_empty() || path.port_num() != 0 {
                println!("host:      {}", path.host());
                println!("port:      {}", path.port_num());
            }
            println!("path:      {}", path.path_str());
            if !path.query().is_empty() {
                println!("query:     {}", path.query());
            }
            if !path.fragment().is_empty() {
                println!("fragment:  {}", path.fragment());
            }
            if path.acc_code() != 0 {
                println!("acc code:  {:#07x}", path.acc_code());
            }
            if path.obj_id() != 0 {
                println!("object id: {}", path.obj_id());
            }
            println!("uri:       {}", path.to_uri().into_diagnostic()?);
            Ok(())
        }
        Commands::Cat(args) => {
            let path = manager.make_path(&args.uri).into_diagnostic()?;
            let file = if args.decrypt {
                manager.open_file_read_decrypt(&path)
            } else {
                manager.open_file_read(&path)
            }
            .into_diagnostic()?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut offset = 0u64;
            let mut buf = vec![0u8; 128 * 1024];
            loop {
                let n = read_all_at(file.as_ref(), offset, &mut buf).into_diagnostic()?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).into_diagnostic()?;
                offset += n as u64;
            }
            Ok(())
        }
        Commands::Ls(args) => {
            let path = manager.make_path(&args.uri).into_diagnostic()?;
            let dir = if args.decrypt {
                manager.open_dir_read_decrypt(&path)
            } else {
                manager.open_dir_read(&path)
            }
            .into_diagnostic()?;
            for name in dir.list("").into_diagnostic()? {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Resolve(args) => {
            let path = manager.make_path(&args.uri).into_diagnostic()?;
            let flags = ResolveFlags {
                no_acc_local: args.no_local,
                no_acc_remote: args.no_remote,
                kdb_acc: args.kdb_acc,
            };
            let resolved = manager.resolve_path(flags, &path).into_diagnostic()?;
            println!("{}", resolved.to_path_string().into_diagnostic()?);
            Ok(())
        }
    }
}
