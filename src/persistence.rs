//! Persistence layer for stage artifacts.
//!
//! Supports both JSON (human-readable) and bincode (efficient binary) formats.
//! Sheets, answers and metadata are JSON; the vector store is bincode.

use crate::error::{BenchError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Save format for artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SaveFormat::Json,
            Some("bin") | Some("bincode") => SaveFormat::Bincode,
            _ => SaveFormat::Json, // Default to JSON
        }
    }
}

/// Save a value, picking the format from the file extension.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    save_with_format(value, path, SaveFormat::from_path(path))
}

/// Save a value as pretty-printed JSON.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    save_with_format(value, path, SaveFormat::Json)
}

/// Save a value with a specific format, creating parent directories.
pub fn save_with_format<T: Serialize>(value: &T, path: &Path, format: SaveFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
        }
    }

    let data = match format {
        SaveFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| BenchError::Serialization(e.to_string()))?
            .into_bytes(),
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            bincode::serde::encode_to_vec(value, config)
                .map_err(|e| BenchError::Serialization(e.to_string()))?
        }
    };

    fs::write(path, &data).map_err(|e| BenchError::io(path, e))?;

    Ok(())
}

/// Load a value, picking the format from the file extension.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    load_with_format(path, SaveFormat::from_path(path))
}

/// Load a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    load_with_format(path, SaveFormat::Json)
}

/// Load a value with a specific format.
pub fn load_with_format<T: DeserializeOwned>(path: &Path, format: SaveFormat) -> Result<T> {
    if !path.exists() {
        return Err(BenchError::FileNotFound(path.to_path_buf()));
    }

    let data = fs::read(path).map_err(|e| BenchError::io(path, e))?;

    let value = match format {
        SaveFormat::Json => serde_json::from_slice(&data).map_err(|e| {
            BenchError::Serialization(format!("{}: {}", path.display(), e))
        })?,
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            let (value, _): (T, usize) = bincode::serde::decode_from_slice(&data, config)
                .map_err(|e| BenchError::Serialization(e.to_string()))?;
            value
        }
    };

    Ok(value)
}

/// Check if an artifact file exists at the given path.
pub fn artifact_exists(path: &Path) -> bool {
    path.exists() && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{ExamMetadata, ExamSheet, Question};
    use serde::Deserialize;
    use tempfile::TempDir;

    fn create_test_sheet() -> ExamSheet {
        ExamSheet::new(
            ExamMetadata::new("Informatiker", "1"),
            vec![
                Question::leaf("1", "Define latency.").with_points(2.0),
                Question::group(
                    "2",
                    "Networking basics",
                    vec![Question::leaf("2a", "What does DNS do?").with_points(1.0)],
                ),
            ],
        )
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Vectors {
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("answer_sheet.json");

        let original = create_test_sheet();
        save(&original, &path).unwrap();

        assert!(artifact_exists(&path));

        let loaded: ExamSheet = load(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.count_answerable(), 2);
    }

    #[test]
    fn test_save_and_load_bincode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");

        let original = Vectors {
            ids: vec!["a.md_0".to_string(), "a.md_1".to_string()],
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        };
        save(&original, &path).unwrap();

        let loaded: Vectors = load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            SaveFormat::from_path(Path::new("test.json")),
            SaveFormat::Json
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("test.bin")),
            SaveFormat::Bincode
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("test.bincode")),
            SaveFormat::Bincode
        );
        assert_eq!(SaveFormat::from_path(Path::new("test")), SaveFormat::Json);
    }

    #[test]
    fn test_load_nonexistent() {
        let result: Result<ExamSheet> = load(Path::new("/nonexistent/sheet.json"));
        assert!(matches!(result, Err(BenchError::FileNotFound(_))));
    }

    #[test]
    fn test_json_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("answer_sheet.json");

        save_json(&create_test_sheet(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Informatiker"));
        assert!(content.contains("What does DNS do?"));
    }
}
