// SPDX-License-Identifier: GPL-3.0-only

//! Pre-launch checks on rescue options

use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};
use rescue_contracts::RescueError;
use rescue_types::RescueOptions;

/// Resolve symlinks and `..` when the path exists; keep it verbatim otherwise.
fn normalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn writable(path: &Path) -> bool {
    if path.exists() {
        return access(path, AccessFlags::W_OK).is_ok();
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    access(parent, AccessFlags::W_OK).is_ok()
}

/// Reject options ddrescue would either refuse or turn destructive.
pub fn validate_options(options: &RescueOptions) -> Result<(), RescueError> {
    if options.input.as_os_str().is_empty() {
        return Err(RescueError::InvalidOptions("input path is empty".to_string()));
    }
    if options.output.as_os_str().is_empty() {
        return Err(RescueError::InvalidOptions("output path is empty".to_string()));
    }

    let input = normalized(&options.input);
    let output = normalized(&options.output);
    if input == output {
        return Err(RescueError::InvalidOptions(format!(
            "output {} is the same as the input",
            options.output.display()
        )));
    }

    if let Some(map_file) = &options.map_file {
        if map_file.as_os_str().is_empty() {
            return Err(RescueError::InvalidOptions("map file path is empty".to_string()));
        }
        let map = normalized(map_file);
        if map == input || map == output {
            return Err(RescueError::InvalidOptions(format!(
                "map file {} collides with the input or output",
                map_file.display()
            )));
        }
        if !writable(map_file) {
            return Err(RescueError::InvalidOptions(format!(
                "map file {} is not writable",
                map_file.display()
            )));
        }
    }

    if options.output_is_device() && !options.force_overwrite {
        return Err(RescueError::InvalidOptions(format!(
            "output {} is a device; overwriting it requires force",
            options.output.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_identical_paths_are_rejected() {
        let empty = RescueOptions::new("", "out.img");
        assert!(matches!(validate_options(&empty), Err(RescueError::InvalidOptions(_))));

        let dir = tempfile::tempdir().expect("temp dir");
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").expect("create image");
        let aliased = RescueOptions::new(&image, dir.path().join(".").join("disk.img"));
        assert!(matches!(validate_options(&aliased), Err(RescueError::InvalidOptions(_))));
    }

    #[test]
    fn map_file_must_be_distinct_and_writable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("input.img");
        let output = dir.path().join("output.img");

        let clash = RescueOptions::new(&input, &output).with_map_file(&output);
        assert!(matches!(validate_options(&clash), Err(RescueError::InvalidOptions(_))));

        let missing_dir = RescueOptions::new(&input, &output)
            .with_map_file(dir.path().join("no/such/dir/rescue.map"));
        assert!(matches!(
            validate_options(&missing_dir),
            Err(RescueError::InvalidOptions(message)) if message.contains("not writable")
        ));

        let fine = RescueOptions::new(&input, &output).with_map_file(dir.path().join("rescue.map"));
        assert_eq!(validate_options(&fine), Ok(()));
    }

    #[test]
    fn device_output_requires_force() {
        let mut options = RescueOptions::new("/dev/sdb", "/dev/sdc");
        assert!(validate_options(&options).is_err());

        options.force_overwrite = true;
        assert_eq!(validate_options(&options), Ok(()));
    }
}
