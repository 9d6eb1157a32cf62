//! Final image Dockerfile and build context.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::consts::STAMP_FILENAME;

pub fn render_dockerfile(stack_image: &str) -> String {
  format!("FROM {stack_image}\nCOPY app /app\nENTRYPOINT [\"/app/entrypoint\"]\n")
}

/// Write `<work_dir>/image/Dockerfile` and pack it together with `app_dir`
/// (minus its top-level `.git` and build stamp) into a tar build context.
///
/// The app tree is stored under `app/`; symlinks are stored as links.
pub fn build_context(work_dir: &Path, app_dir: &Path, stack_image: &str) -> io::Result<Vec<u8>> {
  let image_dir = work_dir.join("image");
  std::fs::create_dir_all(&image_dir)?;
  let dockerfile = image_dir.join("Dockerfile");
  std::fs::write(&dockerfile, render_dockerfile(stack_image))?;

  let mut builder = tar::Builder::new(Vec::new());
  builder.follow_symlinks(false);
  builder.append_path_with_name(&dockerfile, "Dockerfile")?;

  let mut entries = 0usize;
  let walker = WalkDir::new(app_dir)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.depth() != 1 || !(entry.file_name() == ".git" || entry.file_name() == STAMP_FILENAME));

  for entry in walker {
    let entry = entry?;
    let relative = entry.path().strip_prefix(app_dir).map_err(io::Error::other)?;
    let name = PathBuf::from("app").join(relative);

    if entry.file_type().is_dir() {
      builder.append_dir(&name, entry.path())?;
    } else {
      builder.append_path_with_name(entry.path(), &name)?;
    }
    entries += 1;
  }

  let archive = builder.into_inner()?;
  debug!(entries, bytes = archive.len(), "packed build context");
  Ok(archive)
}
