//! GDB をアタッチしてアドレスを解決するシンボライザ
//!
//! 対象プロセスに `gdb --batch --pid` でアタッチし、アドレスごとに `info symbol` を
//! 実行する Python スクリプトを読み込ませます。スクリプトの出力は
//! タグで囲まれた1行1アドレスの形式で、ここでパースします。

use crate::address::Address;
use crate::process::run_captured;
use crate::symbols::{AddressSymbolizer, SymbolTable};
use crate::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCRIPT_HEADER: &str = r#"
import gdb

def addr2symbol(address):
    try:
        gdb_address = gdb.parse_and_eval(f'({address})')
        symbol_info = gdb.execute(f'info symbol {gdb_address}', to_string=True).strip()
        if symbol_info:
            print(f'___ADDRESS___{address}___ADDRESS______FUNC___{symbol_info}___FUNC___')
        else:
            print(f'___ADDRESS___{address}___ADDRESS______FUNC___NOTFOUND___FUNC___')
    except gdb.error as e:
        print(f'___ADDRESS___{address}___ADDRESS______ERROR___{e}___ERROR___')
"#;

/// 自動デマングルを切らないと分類規則がマングル名を前提にできない
const NO_DEMANGLE: &str = "gdb.execute('set print demangle off')\n";
const QUIT: &str = "gdb.execute('quit')\n";

/// `info symbol` 出力行のパーサ
pub struct GdbLineParser {
    found_pattern: Regex,
}

/// パースされた1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdbHit {
    pub address: u64,
    pub symbol: String,
    pub section: String,
    /// `sym + off` 形式のときの関数先頭からのオフセット
    pub offset: Option<u64>,
    /// `of <lib>` がない場合はメイン実行ファイル
    pub library: Option<String>,
}

impl GdbLineParser {
    pub fn new() -> Result<Self> {
        // 例: ___ADDRESS___4096___ADDRESS______FUNC___foo + 16 in section .text of /lib/libfoo.so___FUNC___
        let found_pattern = Regex::new(
            r"___ADDRESS___(.*?)___ADDRESS______FUNC___(\S+)(?:\s+\+\s+(\d+))?\s+in section\s+(\S+)(?:\s+of\s+(.+?))?___FUNC___",
        )?;
        Ok(Self { found_pattern })
    }

    /// 1行をパースする。未解決行やエラー行は None
    pub fn parse_line(&self, line: &str) -> Option<GdbHit> {
        let caps = self.found_pattern.captures(line)?;
        let address = caps[1].parse::<Address>().ok()?.0;
        Some(GdbHit {
            address,
            symbol: caps[2].to_string(),
            offset: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            section: caps[4].to_string(),
            library: caps.get(5).map(|m| m.as_str().trim().to_string()),
        })
    }
}

impl Default for GdbLineParser {
    fn default() -> Self {
        Self::new().expect("Failed to create GdbLineParser")
    }
}

/// GDB をアタッチするシンボライザ
#[derive(Debug, Clone)]
pub struct GdbSymbolizer {
    gdb: PathBuf,
    pid: u32,
    /// ptrace 権限がない環境向けに sudo 経由で起動する
    use_sudo: bool,
    timeout: Duration,
}

impl GdbSymbolizer {
    pub fn new(pid: u32) -> Self {
        Self {
            gdb: PathBuf::from("gdb"),
            pid,
            use_sudo: false,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_gdb(mut self, gdb: impl Into<PathBuf>) -> Self {
        self.gdb = gdb.into();
        self
    }

    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// GDB に読み込ませるスクリプトを生成する
    pub fn script(addresses: &BTreeSet<u64>) -> String {
        let mut script = String::from(SCRIPT_HEADER);
        script.push_str(NO_DEMANGLE);
        for addr in addresses {
            let _ = writeln!(script, "addr2symbol({})", addr);
        }
        script.push_str(QUIT);
        script
    }

    /// GDB の出力を解決結果に変換する
    pub fn parse_output(&self, output: &str) -> SymbolTable {
        let parser = GdbLineParser::default();
        let executable = self.main_executable();
        let mut table = SymbolTable::new();

        for line in output.lines() {
            let Some(hit) = parser.parse_line(line) else {
                if line.contains("___ADDRESS___") {
                    debug!("Unresolved: {}", line);
                }
                continue;
            };
            if let Some(offset) = hit.offset {
                // 関数の途中を指すアドレスは入口ではない可能性がある
                debug!("0x{:x} is {} + {}, not a symbol start", hit.address, hit.symbol, offset);
            }
            match hit.library.or_else(|| executable.clone()) {
                Some(library) => table.insert(hit.address, hit.symbol, library),
                None => debug!("No owning object for 0x{:x}", hit.address),
            }
        }
        table
    }

    fn main_executable(&self) -> Option<String> {
        fs::read_link(format!("/proc/{}/exe", self.pid))
            .ok()
            .map(|p| p.display().to_string())
    }

    fn command(&self, script_path: &std::path::Path) -> Command {
        let mut command = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(&self.gdb);
            c
        } else {
            Command::new(&self.gdb)
        };
        command
            .arg("--batch")
            .arg("-ex")
            .arg(format!("source {}", script_path.display()))
            .arg("--pid")
            .arg(self.pid.to_string());
        command
    }
}

impl AddressSymbolizer for GdbSymbolizer {
    fn resolve(&self, addresses: &BTreeSet<u64>) -> Result<SymbolTable> {
        // GDB は拡張子で読み込み方法を決めるため .py が必須
        let script_file = tempfile::Builder::new()
            .prefix("hashi_gdb_")
            .suffix(".py")
            .tempfile()?;
        fs::write(script_file.path(), Self::script(addresses))?;

        info!("Attaching gdb to {} for {} addresses", self.pid, addresses.len());
        let output = match run_captured(&mut self.command(script_file.path()), self.timeout)? {
            Some(output) => output,
            None => return Ok(SymbolTable::new()),
        };
        if !output.status.success() {
            warn!("gdb exited with {}: {}", output.status, output.stderr.trim());
        }

        let table = self.parse_output(&output.stdout);
        if table.len() != addresses.len() {
            info!("Resolved {} of {} addresses", table.len(), addresses.len());
        }
        Ok(table)
    }
}
