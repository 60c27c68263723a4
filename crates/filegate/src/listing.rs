//! HTML directory index.

use std::io;
use std::path::Path;

use html_escape::{encode_double_quoted_attribute, encode_text};
use tokio::fs;

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
}

impl ListingEntry {
    /// Name as shown in the index; directories get a trailing `/`.
    pub fn display_name(&self) -> String {
        if self.is_dir {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }

    /// Link target relative to the current URL.
    fn href(&self) -> String {
        let encoded = urlencoding::encode(&self.name);
        if self.is_dir {
            format!("{encoded}/")
        } else {
            encoded.into_owned()
        }
    }
}

/// Enumerate the immediate children of `dir` in the order the filesystem
/// returns them. Symlinks are reported as non-directories.
pub async fn read_entries(dir: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }
    Ok(entries)
}

/// Render the index page for `dir`. All names are escaped before embedding.
pub fn render(dir: &Path, entries: &[ListingEntry]) -> String {
    let mut html = String::from("<html><body>");
    html.push_str(&format!(
        "<h1>Links for {}</h1>",
        encode_text(&dir.display().to_string())
    ));
    html.push_str("<ul>");
    for entry in entries {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            encode_double_quoted_attribute(&entry.href()),
            encode_text(&entry.display_name())
        ));
    }
    html.push_str("</ul>");
    html.push_str("</body></html>");
    html
}
