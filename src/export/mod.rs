//! Read-only export of an archive's metadata for foreign consumers.
//!
//! [`ExportSnapshot`] is a frozen copy of the character table and the file
//! records.  It serializes with serde and renders four C++17 headers that let
//! a consumer extract the bundle without linking this crate:
//!
//! | header            | contents                                         |
//! |-------------------|--------------------------------------------------|
//! | `keys.hpp`        | `fmod_keys::bin` (label → index), `fmod_keys::keys` (code point → label) |
//! | `export.hpp`      | `fmod_export::files`                             |
//! | `extract.hpp`     | `readFileRange`, `decodeText`                    |
//! | `extractAll.hpp`  | `extractAll(archive, outDir, skipBinary)`        |

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::index::{FileRecord, Manifest};
use crate::table::IndexWidth;

pub const KEYS_HPP:        &str = "keys.hpp";
pub const EXPORT_HPP:      &str = "export.hpp";
pub const EXTRACT_HPP:     &str = "extract.hpp";
pub const EXTRACT_ALL_HPP: &str = "extractAll.hpp";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSnapshot {
    pub index_width: IndexWidth,
    /// (label, index) in first-seen order.
    pub index_table: Vec<(String, u32)>,
    /// (character, label) in first-seen order.
    pub label_table: Vec<(char, String)>,
    pub files:       Vec<FileRecord>,
}

impl ExportSnapshot {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let table = &manifest.table;
        Self {
            index_width: table.width(),
            index_table: table.indices().map(|(l, i)| (l.to_owned(), i)).collect(),
            label_table: table.labels().map(|(c, l)| (c, l.to_owned())).collect(),
            files:       manifest.files.clone(),
        }
    }

    pub fn index_table(&self) -> &[(String, u32)] { &self.index_table }

    pub fn label_table(&self) -> &[(char, String)] { &self.label_table }

    pub fn files(&self) -> &[FileRecord] { &self.files }

    // ── Rendering ────────────────────────────────────────────────────────────

    pub fn render_keys_hpp(&self) -> String {
        let mut out = String::new();
        out.push_str("#pragma once\n// Auto-generated keys.hpp\n\n");
        out.push_str("#include <cstddef>\n#include <cstdint>\n#include <string>\n#include <unordered_map>\n\n");
        out.push_str("namespace fmod_keys {\n");
        let _ = writeln!(out, "  static const std::size_t indexWidth = {};\n", self.index_width.bytes());

        out.push_str("  static const std::unordered_map<std::string, std::uint32_t> bin = {\n");
        let rows: Vec<String> = self.index_table.iter()
            .map(|(label, index)| format!("    {{{}, {}}}", cpp_string(label), index))
            .collect();
        push_rows(&mut out, &rows);
        out.push_str("  };\n\n");

        out.push_str("  static const std::unordered_map<char32_t, std::string> keys = {\n");
        let rows: Vec<String> = self.label_table.iter()
            .map(|(ch, label)| format!("    {{0x{:X}, {}}}", u32::from(*ch), cpp_string(label)))
            .collect();
        push_rows(&mut out, &rows);
        out.push_str("  };\n}\n");
        out
    }

    pub fn render_export_hpp(&self) -> String {
        let mut out = String::new();
        out.push_str("#pragma once\n// Auto-generated export.hpp\n\n");
        out.push_str("#include <cstddef>\n#include <string>\n#include <vector>\n\n");
        out.push_str("namespace fmod_export {\n");
        out.push_str("  struct FileMeta {\n    std::string path;\n    std::size_t offset;\n    std::size_t length;\n    bool binary;\n  };\n\n");
        out.push_str("  static const std::vector<FileMeta> files = {\n");
        let rows: Vec<String> = self.files.iter()
            .map(|f| format!("    {{{}, {}, {}, {}}}", cpp_string(&f.path), f.offset, f.length, f.binary))
            .collect();
        push_rows(&mut out, &rows);
        out.push_str("  };\n}\n");
        out
    }

    pub fn render_extract_hpp(&self) -> String {
        EXTRACT_HPP_SRC.to_owned()
    }

    pub fn render_extract_all_hpp(&self) -> String {
        EXTRACT_ALL_HPP_SRC.to_owned()
    }

    /// (file name, contents) for every header.
    pub fn render_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEYS_HPP,        self.render_keys_hpp()),
            (EXPORT_HPP,      self.render_export_hpp()),
            (EXTRACT_HPP,     self.render_extract_hpp()),
            (EXTRACT_ALL_HPP, self.render_extract_all_hpp()),
        ]
    }
}

/// Render and write all headers into `dir`, creating it if necessary.
pub fn write_headers<P: AsRef<Path>>(dir: P, manifest: &Manifest) -> io::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let snapshot = ExportSnapshot::from_manifest(manifest);

    let mut written = Vec::new();
    for (name, contents) in snapshot.render_headers() {
        let path = dir.join(name);
        fs::write(&path, contents)?;
        info!("generated {} -> {}", name, path.display());
        written.push(path);
    }
    info!(
        characters = snapshot.label_table.len(),
        bin_entries = snapshot.index_table.len(),
        files = snapshot.files.len(),
        "C++ headers written"
    );
    Ok(written)
}

fn push_rows(out: &mut String, rows: &[String]) {
    out.push_str(&rows.join(",\n"));
    if !rows.is_empty() {
        out.push('\n');
    }
}

/// Quote `s` as a C++ string literal.  Bytes outside printable ASCII are
/// written as three-digit octal escapes, which never absorb following digits.
fn cpp_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for &b in s.as_bytes() {
        match b {
            b'"'  => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            // `??` starts a trigraph in older dialects.
            b'?'  => out.push_str("\\?"),
            0x20..=0x7E => out.push(b as char),
            _ => { let _ = write!(out, "\\{:03o}", b); }
        }
    }
    out.push('"');
    out
}

const EXTRACT_HPP_SRC: &str = r##"#pragma once
// Auto-generated extract.hpp

#include "keys.hpp"
#include <cstddef>
#include <cstdint>
#include <fstream>
#include <stdexcept>
#include <string>
#include <unordered_map>
#include <vector>

namespace fmod_extract {
  inline std::vector<char> readFileRange(const std::string& file, std::size_t offset, std::size_t length) {
    std::ifstream in(file, std::ios::binary);
    if (!in) throw std::runtime_error("Failed to open " + file);
    in.seekg(static_cast<std::streamoff>(offset));
    std::vector<char> buffer(length);
    if (length > 0) in.read(buffer.data(), static_cast<std::streamsize>(length));
    if (!in) throw std::runtime_error("Failed to read data from " + file);
    return buffer;
  }

  inline void appendUtf8(std::string& out, char32_t cp) {
    if (cp < 0x80) {
      out += static_cast<char>(cp);
    } else if (cp < 0x800) {
      out += static_cast<char>(0xC0 | (cp >> 6));
      out += static_cast<char>(0x80 | (cp & 0x3F));
    } else if (cp < 0x10000) {
      out += static_cast<char>(0xE0 | (cp >> 12));
      out += static_cast<char>(0x80 | ((cp >> 6) & 0x3F));
      out += static_cast<char>(0x80 | (cp & 0x3F));
    } else {
      out += static_cast<char>(0xF0 | (cp >> 18));
      out += static_cast<char>(0x80 | ((cp >> 12) & 0x3F));
      out += static_cast<char>(0x80 | ((cp >> 6) & 0x3F));
      out += static_cast<char>(0x80 | (cp & 0x3F));
    }
  }

  // Reverse the character codec: big-endian indices -> labels -> code points -> UTF-8.
  inline std::string decodeText(const std::vector<char>& payload) {
    static const auto byIndex = [] {
      std::unordered_map<std::uint32_t, std::string> m;
      for (const auto& kv : fmod_keys::bin) m.emplace(kv.second, kv.first);
      return m;
    }();
    static const auto byLabel = [] {
      std::unordered_map<std::string, char32_t> m;
      for (const auto& kv : fmod_keys::keys) m.emplace(kv.second, kv.first);
      return m;
    }();

    const std::size_t width = fmod_keys::indexWidth;
    if (payload.size() % width != 0) throw std::runtime_error("Truncated text payload");

    std::string out;
    out.reserve(payload.size() / width);
    for (std::size_t i = 0; i < payload.size(); i += width) {
      std::uint32_t index = 0;
      for (std::size_t b = 0; b < width; ++b) {
        index = (index << 8) | static_cast<unsigned char>(payload[i + b]);
      }
      auto label = byIndex.find(index);
      if (label == byIndex.end()) throw std::runtime_error("Unknown index " + std::to_string(index));
      auto ch = byLabel.find(label->second);
      if (ch == byLabel.end()) throw std::runtime_error("Unknown label " + label->second);
      appendUtf8(out, ch->second);
    }
    return out;
  }
}
"##;

const EXTRACT_ALL_HPP_SRC: &str = r##"#pragma once
// Auto-generated extractAll.hpp

#include "extract.hpp"
#include "export.hpp"
#include <filesystem>
#include <fstream>
#include <iostream>

namespace fmod_extract_all {

  // Extract every file of the bundle.
  // - fmodFilePath: path to bundle.fmod
  // - outputDir:    directory to write extracted files into
  // - skipBinary:   skip records marked as binary
  inline void extractAll(const std::string& fmodFilePath, const std::string& outputDir, bool skipBinary = false) {
    namespace fs = std::filesystem;

    std::ifstream in(fmodFilePath, std::ios::binary);
    if (!in) {
      std::cerr << "Failed to open archive file: " << fmodFilePath << std::endl;
      return;
    }

    std::size_t extractedCount = 0;
    std::size_t skippedCount = 0;
    std::size_t failedCount = 0;

    for (const auto& fileMeta : fmod_export::files) {
      if (skipBinary && fileMeta.binary) {
        ++skippedCount;
        std::cout << "[skip binary] " << fileMeta.path << std::endl;
        continue;
      }

      try {
        in.clear();
        in.seekg(static_cast<std::streamoff>(fileMeta.offset));
        std::vector<char> buffer(fileMeta.length);
        if (fileMeta.length > 0) in.read(buffer.data(), static_cast<std::streamsize>(fileMeta.length));
        if (!in) {
          std::cerr << "Failed to read data for " << fileMeta.path << std::endl;
          ++failedCount;
          continue;
        }

        fs::path outPath = fs::path(outputDir) / fs::path(fileMeta.path);
        fs::create_directories(outPath.parent_path());

        std::ofstream out(outPath, std::ios::binary);
        if (!out) {
          std::cerr << "Failed to open output file: " << outPath << std::endl;
          ++failedCount;
          continue;
        }

        if (fileMeta.binary) {
          out.write(buffer.data(), static_cast<std::streamsize>(buffer.size()));
        } else {
          const std::string text = fmod_extract::decodeText(buffer);
          out.write(text.data(), static_cast<std::streamsize>(text.size()));
        }
        if (!out) {
          std::cerr << "Failed to write data to: " << outPath << std::endl;
          ++failedCount;
          continue;
        }

        std::cout << "[extracted] " << fileMeta.path << std::endl;
        ++extractedCount;
      }
      catch (const std::exception& e) {
        std::cerr << "Exception processing " << fileMeta.path << ": " << e.what() << std::endl;
        ++failedCount;
      }
    }

    std::cout << "\nExtraction complete.\n";
    std::cout << "  Files extracted: " << extractedCount << std::endl;
    std::cout << "  Files skipped (binary): " << skippedCount << std::endl;
    std::cout << "  Files failed: " << failedCount << std::endl;
  }
}
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CharTable, LabelGenerator, LabelPolicy};

    fn manifest() -> Manifest {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = LabelGenerator::with_seed(LabelPolicy::default(), 11).unwrap();
        for ch in "h\"é".chars() {
            table.ensure_entry(ch, &mut gen).unwrap();
        }
        Manifest::new(table, vec![
            FileRecord { path: "dir/a \"q\".json".into(), offset: 0, length: 6, binary: false },
            FileRecord { path: "b.png".into(), offset: 6, length: 2, binary: true },
        ])
    }

    #[test]
    fn snapshot_preserves_order() {
        let m = manifest();
        let snap = ExportSnapshot::from_manifest(&m);
        let chars: Vec<char> = snap.label_table().iter().map(|(c, _)| *c).collect();
        assert_eq!(chars, vec!['h', '"', 'é']);
        let indices: Vec<u32> = snap.index_table().iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(snap.files(), m.files.as_slice());
    }

    #[test]
    fn keys_header_lists_code_points_and_indices() {
        let m = manifest();
        let hpp = ExportSnapshot::from_manifest(&m).render_keys_hpp();
        let label_h = m.table.label_of('h').unwrap();
        assert!(hpp.contains("indexWidth = 2;"));
        assert!(hpp.contains(&format!("{{\"{label_h}\", 0}}")));
        assert!(hpp.contains(&format!("{{0x68, \"{label_h}\"}}")));
        assert!(hpp.contains("{0x22, "));
        assert!(hpp.contains("{0xE9, "));
    }

    #[test]
    fn export_header_escapes_paths() {
        let hpp = ExportSnapshot::from_manifest(&manifest()).render_export_hpp();
        assert!(hpp.contains(r#"{"dir/a \"q\".json", 0, 6, false}"#));
        assert!(hpp.contains(r#"{"b.png", 6, 2, true}"#));
    }

    #[test]
    fn cpp_string_escapes_non_ascii_as_octal() {
        assert_eq!(cpp_string("é1"), "\"\\303\\2511\"");
        assert_eq!(cpp_string("a\\b?"), "\"a\\\\b\\?\"");
    }

    #[test]
    fn empty_archive_renders_empty_initialisers() {
        let m = Manifest::new(CharTable::new(IndexWidth::U16), vec![]);
        let snap = ExportSnapshot::from_manifest(&m);
        assert!(snap.render_keys_hpp().contains("bin = {\n  };"));
        assert!(snap.render_export_hpp().contains("files = {\n  };"));
    }
}
