//! 解析対象ファイルの探索とモジュール名

use crate::Result;
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// 重複除去で避けたいパス中の語
const DISFAVORED: &[&str] = &["darwin", "build", "tmp"];

/// ルート以下を再帰的に探し、指定拡張子のファイルを返す
///
/// 各ディレクトリの中身は名前順に辿る。シンボリックリンクのディレクトリは辿らない。
/// 読めないディレクトリは警告して飛ばす。
pub fn find_candidates(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Package root {:?} is not a directory", root);
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let mut found = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        let Some(file_type) = entry.file_type() else { continue };
        // リンク先がファイルなら対象に含める
        let is_file = file_type.is_file() || (file_type.is_symlink() && path.is_file());
        if !is_file {
            if !file_type.is_dir() {
                trace!("Skipping {}", path.display());
            }
            continue;
        }
        if has_extension(path, extensions) {
            found.push(path.to_path_buf());
        }
    }
    debug!("{} candidate files under {}", found.len(), root.display());
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e))
        .unwrap_or(false)
}

/// ファイル名ごとに1つだけ残す
///
/// ルートより下の部分に `darwin` / `build` / `tmp` を含まない存在するパスを優先し、
/// なければ存在する任意のパスを使う。順序はファイル名の初出順。
pub fn dedup_paths(paths: &[PathBuf], root: &Path) -> Vec<PathBuf> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&PathBuf>> = HashMap::new();
    for path in paths {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        groups
            .entry(base.clone())
            .or_insert_with(|| {
                order.push(base);
                Vec::new()
            })
            .push(path);
    }

    let mut result = Vec::new();
    for base in order {
        let Some(group) = groups.get(&base) else { continue };
        let preferred = group.iter().find(|p| {
            let text = p.strip_prefix(root).unwrap_or(p.as_path()).to_string_lossy();
            !DISFAVORED.iter().any(|w| text.contains(w)) && p.exists()
        });
        let chosen = preferred.or_else(|| group.iter().find(|p| p.exists()));
        match chosen {
            Some(path) => result.push((*path).clone()),
            None => debug!("No existing file for {}", base),
        }
    }
    result
}

/// モジュールの名前 `<ルート名>/<ルートからの相対パス（最後の拡張子を除く）>`
pub fn module_fqn(file: &Path, root: &Path) -> String {
    let package = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = Path::new(last.as_str()).file_stem() {
            *last = stem.to_string_lossy().into_owned();
        }
    }
    format!("{}/{}", package, parts.join("/"))
}
