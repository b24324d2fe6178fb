//! Supported media types and extension matching
//!
//! The set is fetched from the server once at startup. When the fetch fails
//! the built-in list below is used, so the agent always has a usable filter.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Canonical fallback when the server does not advertise its media types
pub const BUILTIN_IMAGE_EXTENSIONS: &[&str] = &[
	".3fr", ".ari", ".arw", ".cap", ".cin", ".cr2", ".cr3", ".crw", ".dcr", ".dng", ".erf", ".fff",
	".iiq", ".k25", ".kdc", ".mrw", ".nef", ".nrw", ".orf", ".ori", ".pef", ".psd", ".raf", ".raw",
	".rw2", ".rwl", ".sr2", ".srf", ".srw", ".x3f", ".avif", ".bmp", ".gif", ".heic", ".heif",
	".hif", ".insp", ".jpe", ".jpeg", ".jpg", ".jxl", ".png", ".svg", ".tif", ".tiff", ".webp",
];

pub const BUILTIN_VIDEO_EXTENSIONS: &[&str] = &[
	".3gp", ".3gpp", ".avi", ".flv", ".insv", ".m2ts", ".m4v", ".mkv", ".mov", ".mp4", ".mpe",
	".mpeg", ".mpg", ".mts", ".webm", ".wmv",
];

pub const BUILTIN_SIDECAR_EXTENSIONS: &[&str] = &[".xmp"];

/// Wire shape of `GET /server/media-types`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaTypesResponse {
	#[serde(default)]
	pub image: Vec<String>,
	#[serde(default)]
	pub sidecar: Vec<String>,
	#[serde(default)]
	pub video: Vec<String>,
}

/// Extensions accepted by the server, stored lowercase and dot-prefixed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedTypeSet {
	image: BTreeSet<String>,
	sidecar: BTreeSet<String>,
	video: BTreeSet<String>,
}

fn normalize(ext: &str) -> String {
	let ext = ext.trim().to_lowercase();
	if ext.starts_with('.') {
		ext
	} else {
		format!(".{}", ext)
	}
}

fn collect<'a>(exts: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
	exts.into_iter().filter(|e| !e.trim().is_empty()).map(normalize).collect()
}

impl SupportedTypeSet {
	pub fn new<'a>(
		image: impl IntoIterator<Item = &'a str>,
		sidecar: impl IntoIterator<Item = &'a str>,
		video: impl IntoIterator<Item = &'a str>,
	) -> Self {
		SupportedTypeSet { image: collect(image), sidecar: collect(sidecar), video: collect(video) }
	}

	/// The built-in default set
	pub fn builtin() -> Self {
		Self::new(
			BUILTIN_IMAGE_EXTENSIONS.iter().copied(),
			BUILTIN_SIDECAR_EXTENSIONS.iter().copied(),
			BUILTIN_VIDEO_EXTENSIONS.iter().copied(),
		)
	}

	/// Build from a server response; an empty image list falls back to the built-in set
	pub fn from_response(resp: &MediaTypesResponse) -> Option<Self> {
		let set = Self::new(
			resp.image.iter().map(String::as_str),
			resp.sidecar.iter().map(String::as_str),
			resp.video.iter().map(String::as_str),
		);
		if set.image.is_empty() {
			None
		} else {
			Some(set)
		}
	}

	pub fn image_extensions(&self) -> &BTreeSet<String> {
		&self.image
	}

	pub fn sidecar_extensions(&self) -> &BTreeSet<String> {
		&self.sidecar
	}

	pub fn video_extensions(&self) -> &BTreeSet<String> {
		&self.video
	}

	/// Case-insensitive suffix match against the image extensions
	///
	/// The extension is everything from the last dot of the file name, so a
	/// dot-only name like `.JPG` still matches. Names that are not valid
	/// UTF-8 are matched on their lossy form.
	pub fn is_supported(&self, path: &Path) -> bool {
		let name = match path.file_name() {
			Some(name) => name.to_string_lossy().to_lowercase(),
			None => return false,
		};
		match name.rfind('.') {
			Some(i) => self.image.contains(&name[i..]),
			None => false,
		}
	}
}

impl Default for SupportedTypeSet {
	fn default() -> Self {
		Self::builtin()
	}
}


// vim: ts=4
