use std::path::{Path, PathBuf};

use crate::dtype::SfbkError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Expand a glob into the SoundFont banks it matches, each paired with the
/// output path it gets inside `output_folder` (original name, `dump_ext`
/// appended in place of the bank extension). Non-bank matches are skipped
/// with a note, unreadable glob entries are reported and skipped.
pub fn collect_bank_paths(input_glob: &str, output_folder: &Path, dump_ext: &str) -> Result<Vec<(PathBuf, PathBuf)>, SfbkError> {
    let mut pairs = Vec::new();
    for entry in glob::glob(input_glob).map_err(|e| SfbkError::Invalid(e.to_string()))? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                println!("{:?}", e);
                continue;
            }
        };
        if !is_soundfont_file(&path) {
            println!("Skipping {}!", path.display());
            continue;
        }
        if let Some(file_name) = path.file_name() {
            let mut output_path = output_folder.join(file_name);
            output_path.set_extension(dump_ext);
            pairs.push((path, output_path));
        }
    }
    Ok(pairs)
}

/// Where dumps go: the given folder, which must exist, or the working
/// directory when none was given.
pub fn resolve_output_folder(output_folder: &Option<PathBuf>) -> Result<PathBuf, SfbkError> {
    match output_folder {
        Some(folder) => {
            if !std::fs::metadata(folder)?.is_dir() {
                return Err(SfbkError::Invalid("Output path must be a folder!".to_string()));
            }
            Ok(folder.clone())
        },
        None => Ok(std::env::current_dir()?)
    }
}

/// A plain file carrying a .sf2 or .sf3 extension, case-insensitively.
pub fn is_soundfont_file<P: AsRef<Path>>(path: P) -> bool {
    let named_like_bank = path.as_ref().extension()
        .and_then(|extension| extension.to_str())
        .map_or(false, |extension| {
            let extension = extension.to_ascii_lowercase();
            extension == "sf2" || extension == "sf3"
        });
    named_like_bank && std::fs::metadata(&path).map_or(false, |metadata| metadata.is_file())
}
