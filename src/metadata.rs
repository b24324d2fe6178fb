//! Upload metadata derived from embedded capture tags and the filesystem

use std::fs;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};

use crate::error::SyncError;
use crate::logging::*;
use crate::types::UploadMetadata;

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Supplies the descriptive fields for an upload
pub trait MetadataSource: Send + Sync {
	fn metadata_of(&self, path: &Path) -> Result<UploadMetadata, SyncError>;
}

/// Reads EXIF make/model/capture time, falling back to filesystem times
#[derive(Debug, Clone, Default)]
pub struct ExifMetadata {
	fallback_device: Option<String>,
}

impl ExifMetadata {
	pub fn new(fallback_device: Option<String>) -> Self {
		ExifMetadata { fallback_device }
	}
}

impl MetadataSource for ExifMetadata {
	fn metadata_of(&self, path: &Path) -> Result<UploadMetadata, SyncError> {
		extract(path, self.fallback_device.as_deref())
	}
}

/// Capture tags found in a file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureTags {
	pub make: Option<String>,
	pub model: Option<String>,
	pub captured_at: Option<NaiveDateTime>,
}

impl CaptureTags {
	/// Camera make and model concatenated, as the server's device tag
	pub fn device_tag(&self) -> Option<String> {
		let tag = format!(
			"{}{}",
			self.make.as_deref().unwrap_or(""),
			self.model.as_deref().unwrap_or("")
		);
		let tag = tag.trim().to_string();
		if tag.is_empty() {
			None
		} else {
			Some(tag)
		}
	}
}

fn ascii_field(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
	let field = exif.get_field(tag, exif::In::PRIMARY)?;
	match field.value {
		exif::Value::Ascii(ref values) => {
			let raw = values.first()?;
			let s = String::from_utf8_lossy(raw)
				.trim_matches(|c: char| c == '\0' || c.is_whitespace())
				.to_string();
			if s.is_empty() {
				None
			} else {
				Some(s)
			}
		}
		_ => None,
	}
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` timestamp
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
	NaiveDateTime::parse_from_str(s.trim(), EXIF_DATETIME_FORMAT).ok()
}

/// Read capture tags; absent or unreadable EXIF yields empty tags
pub fn read_capture_tags(path: &Path) -> Result<CaptureTags, SyncError> {
	let file =
		fs::File::open(path).map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
	let mut reader = BufReader::new(file);
	let exif = match exif::Reader::new().read_from_container(&mut reader) {
		Ok(exif) => exif,
		Err(e) => {
			debug!("No EXIF data in {}: {}", path.display(), e);
			return Ok(CaptureTags::default());
		}
	};

	let captured_at = ascii_field(&exif, exif::Tag::DateTimeOriginal)
		.or_else(|| ascii_field(&exif, exif::Tag::DateTime))
		.and_then(|s| parse_exif_datetime(&s));

	Ok(CaptureTags {
		make: ascii_field(&exif, exif::Tag::Make),
		model: ascii_field(&exif, exif::Tag::Model),
		captured_at,
	})
}

fn local_to_fixed(naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
	Local.from_local_datetime(naive).earliest().map(|dt| dt.fixed_offset())
}

/// Derive the upload form fields for one file
///
/// Missing tags degrade to filesystem times and the fallback device tag.
/// Only an unreadable file or an unavailable modification time fails.
pub fn extract(path: &Path, fallback_device: Option<&str>) -> Result<UploadMetadata, SyncError> {
	let info =
		fs::metadata(path).map_err(|e| SyncError::FileRead { path: path.to_path_buf(), source: e })?;
	let modified = info.modified().map_err(|e| SyncError::MetadataExtraction {
		path: path.to_path_buf(),
		message: format!("modification time unavailable: {}", e),
	})?;
	let modified_at = DateTime::<Local>::from(modified).fixed_offset();

	let tags = read_capture_tags(path)?;
	let created_at = tags.captured_at.as_ref().and_then(local_to_fixed).unwrap_or(modified_at);

	let device_asset_id = path
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	let device_owner_tag = tags
		.device_tag()
		.or_else(|| fallback_device.map(str::to_string))
		.unwrap_or_default();

	Ok(UploadMetadata {
		device_asset_id,
		device_owner_tag,
		content_created_at: created_at,
		content_modified_at: modified_at,
	})
}


// vim: ts=4
