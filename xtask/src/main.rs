use clap::{Parser, Subcommand};
use std::process::Command;

/// portwatch 빌드 태스크
#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 커널 프로그램(socket filter + TC classifier) 빌드
    BuildEbpf {
        /// 릴리스 모드로 빌드
        #[arg(long)]
        release: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildEbpf { release } => {
            build_ebpf(release);
        }
    }
}

fn build_ebpf(release: bool) {
    let mut cmd = Command::new("cargo");
    cmd.current_dir("crates/frame-engine/ebpf");

    cmd.args([
        "+nightly",
        "build",
        "--target=bpfel-unknown-none",
        "--target-dir=../../../target",
        "-Z",
        "build-std=core",
    ]);

    if release {
        cmd.arg("--release");
    }

    let status = match cmd.status() {
        Ok(status) => status,
        Err(e) => {
            eprintln!("failed to run cargo for portwatch-ebpf: {e}");
            std::process::exit(1);
        }
    };
    if !status.success() {
        eprintln!("portwatch-ebpf build failed");
        std::process::exit(1);
    }

    let profile = if release { "release" } else { "debug" };
    println!("portwatch-ebpf built: target/bpfel-unknown-none/{profile}/portwatch-ebpf");
}
