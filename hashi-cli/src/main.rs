//! Hashi CLI - コマンドラインインターフェース
//!
//! パッケージ内のネイティブブリッジを探索する hashi の実行ファイル

use anyhow::Result;
use clap::{Parser, Subcommand};
use hashi_core::{scan_native, scan_wasm, BridgeClassifier, ScanConfig, WalkMode};
use hashi_symbols::{Address, AddressSymbolizer, GdbSymbolizer, ScriptSymbolizer};
use hashi_target::HeapSnapshot;
use hashi_wasm::WasmObjdump;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// resolve-syms の gdb に与える、外側のタイムアウトとの差
const INNER_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Hashi - Native Bridge Discovery
#[derive(Parser)]
#[command(name = "hashi")]
#[command(version = "0.1.0")]
#[command(about = "Discover which native entry points a managed-runtime package dispatches into", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: HashiCommand,
}

#[derive(Subcommand)]
enum HashiCommand {
    /// Scan a package root against a heap snapshot of the loaded runtime
    Scan {
        /// Package root directory
        #[arg(long)]
        root: PathBuf,

        /// Heap snapshot dumped from the target process
        #[arg(long)]
        snapshot: PathBuf,

        /// Target process ID (defaults to the one recorded in the snapshot)
        #[arg(long)]
        pid: Option<u32>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Correlate WASM-backed functions instead of native extensions
        #[arg(long)]
        wasm: bool,

        /// Keep one candidate file per basename
        #[arg(long)]
        dedup: bool,

        /// External symbolizer (defaults to this executable's resolve-syms)
        #[arg(long, env = "HASHI_RESOLVER")]
        resolver: Option<PathBuf>,

        /// Symbolizer timeout in seconds
        #[arg(long, default_value_t = 300)]
        resolve_timeout: u64,

        /// WASM disassembler
        #[arg(long, default_value = "wasm-objdump")]
        objdump: PathBuf,

        /// Disassembler timeout in seconds
        #[arg(long, default_value_t = 60)]
        objdump_timeout: u64,
    },

    /// Resolve addresses of a running process with gdb
    ResolveSyms {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: u32,

        /// JSON array of addresses
        #[arg(short, long)]
        input: PathBuf,

        /// JSON object of resolved symbols
        #[arg(short, long)]
        output: PathBuf,

        /// gdb executable
        #[arg(long, default_value = "gdb")]
        gdb: PathBuf,

        /// Run gdb through sudo
        #[arg(long)]
        sudo: bool,

        /// gdb timeout in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match cli.command {
        HashiCommand::Scan {
            root,
            snapshot,
            pid,
            output,
            wasm,
            dedup,
            resolver,
            resolve_timeout,
            objdump,
            objdump_timeout,
        } => {
            let host = HeapSnapshot::load(&snapshot)?;
            let mode = if wasm { WalkMode::Wasm } else { WalkMode::Native };
            let config = ScanConfig::new(root).with_mode(mode).with_dedup(dedup);
            info!("Package root = {}", config.root.display());

            let report = if wasm {
                let lister = WasmObjdump::new()
                    .with_program(objdump)
                    .with_timeout(Duration::from_secs(objdump_timeout));
                scan_wasm(&host, &lister, &config)?
            } else {
                let pid = pid
                    .or(host.pid())
                    .ok_or_else(|| anyhow::anyhow!("No --pid given and the snapshot records none"))?;
                let symbolizer = init_symbolizer(resolver, pid, resolve_timeout)?;
                let classifier = BridgeClassifier::new()?;
                scan_native(&host, &symbolizer, &classifier, &config)?
            };

            report.write(output.as_deref())?;
        }
        HashiCommand::ResolveSyms {
            pid,
            input,
            output,
            gdb,
            sudo,
            timeout,
        } => {
            resolve_syms(pid, &input, &output, gdb, sudo, timeout)?;
        }
    }

    Ok(())
}

/// ログ出力を初期化する（RUST_LOG が優先、出力先は標準エラー）
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 外部シンボライザを用意する
///
/// 指定がなければ、この実行ファイル自身の resolve-syms を使う。その場合、内側の gdb が
/// 外側の期限より先に打ち切られるよう短いタイムアウトを渡す。
fn init_symbolizer(resolver: Option<PathBuf>, pid: u32, timeout_secs: u64) -> Result<ScriptSymbolizer> {
    let timeout = Duration::from_secs(timeout_secs);
    match resolver {
        Some(program) => {
            debug!("Using resolver {}", program.display());
            Ok(ScriptSymbolizer::new(program, pid).with_timeout(timeout))
        }
        None => {
            let exe = std::env::current_exe()?;
            Ok(ScriptSymbolizer::new(exe, pid)
                .with_prefix_args(self_resolver_args(timeout_secs))
                .with_timeout(timeout))
        }
    }
}

/// 自分自身の resolve-syms に渡す引数
fn self_resolver_args(timeout_secs: u64) -> Vec<String> {
    let inner = timeout_secs.saturating_sub(INNER_TIMEOUT_MARGIN_SECS).max(1);
    vec![
        "resolve-syms".to_string(),
        "--timeout".to_string(),
        inner.to_string(),
    ]
}

/// 要求ファイルのアドレスを gdb で解決し、応答ファイルに書き出す
fn resolve_syms(
    pid: u32,
    input: &Path,
    output: &Path,
    gdb: PathBuf,
    sudo: bool,
    timeout: u64,
) -> Result<()> {
    let raw = fs::read_to_string(input)
        .map_err(|e| anyhow::anyhow!("Failed to read request {:?}: {}", input, e))?;
    let request: Vec<Address> = serde_json::from_str(&raw)?;
    let addresses: BTreeSet<u64> = request.into_iter().map(u64::from).collect();
    info!("Resolving {} addresses in process {}", addresses.len(), pid);

    let symbolizer = GdbSymbolizer::new(pid)
        .with_gdb(gdb)
        .with_sudo(sudo)
        .with_timeout(Duration::from_secs(timeout));
    let table = symbolizer.resolve(&addresses)?;

    let response = serde_json::to_string_pretty(&table.to_response())?;
    fs::write(output, response)
        .map_err(|e| anyhow::anyhow!("Failed to write response {:?}: {}", output, e))?;
    info!("Resolved {}/{} addresses", table.len(), addresses.len());
    Ok(())
}
