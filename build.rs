// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("dpms")
        .version(env!("CARGO_PKG_VERSION"))
        .author("DPMS Contributors")
        .about("Discovery Package Manager")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .env("DPMS_CONFIG")
                .help("Configuration file (default: ~/.dpms/config.toml)"),
        )
        .arg(
            Arg::new("install_root")
                .long("install-root")
                .value_name("PATH")
                .global(true)
                .env("DPMS_INSTALL_ROOT")
                .help("Override the install root from the configuration"),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Answer yes to confirmation prompts"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("install")
                .about("Install packages by name, archive path or URL")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package names, archive paths or URLs"),
                ),
        )
        .subcommand(
            Command::new("uninstall")
                .visible_alias("remove")
                .about("Uninstall packages")
                .arg(
                    Arg::new("packages")
                        .required(true)
                        .num_args(1..)
                        .help("Package names"),
                ),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(
            Command::new("installable")
                .about("List packages available for install")
                .arg(
                    Arg::new("remote")
                        .long("remote")
                        .action(ArgAction::SetTrue)
                        .help("Query the remote repository instead of the local package directory"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search installed and installable packages")
                .arg(Arg::new("query").required(true).help("Case-insensitive substring")),
        )
        .subcommand(
            Command::new("info")
                .about("Show details of an installed package")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("sync").about("Download every remote package into the package directory"),
        )
        .subcommand(
            Command::new("compress")
                .about("Build a tar.gz or tar.xz archive from a file or directory")
                .arg(Arg::new("source").required(true).help("File or directory to archive"))
                .arg(Arg::new("output").required(true).help("Output path without extension"))
                .arg(
                    Arg::new("compression")
                        .short('c')
                        .long("compression")
                        .default_value("gz")
                        .value_parser(["gz", "xz"])
                        .help("Compression type"),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Download a file")
                .arg(Arg::new("url").required(true).help("URL to fetch"))
                .arg(Arg::new("output").required(true).help("Destination path")),
        )
        .subcommand(Command::new("check").about("Compare the registry with the install root"))
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(
                    Arg::new("save")
                        .long("save")
                        .action(ArgAction::SetTrue)
                        .help("Also write it to the configuration file"),
                ),
        )
        .subcommand(
            Command::new("reset").about("Remove the download cache and the configuration file"),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("dpms.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
