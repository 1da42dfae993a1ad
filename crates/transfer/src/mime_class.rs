//! Coarse file classification used by the `fileType` filter.
//!
//! A file is classified by its MIME type first; files whose MIME type only
//! says "some application data" fall back to their extension.

use crate::FileDescriptor;

const COMPRESS_MIMES: &[&str] = &[
    "application/x-gzip",
    "application/gzip",
    "application/x-compressed",
    "application/x-cpio",
    "application/x-gtar",
    "application/x-tar",
    "application/x-zip-compressed",
    "application/zip",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/x-bzip2",
];

const DOC_MIMES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.template",
    "application/vnd.ms-word.document.macroEnabled.12",
    "application/vnd.ms-word.template.macroEnabled.12",
];

const XLS_MIMES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.template",
    "application/vnd.ms-excel.sheet.macroEnabled.12",
    "application/vnd.ms-excel.template.macroEnabled.12",
    "application/vnd.ms-excel.addin.macroEnabled.12",
    "application/vnd.ms-excel.sheet.binary.macroEnabled.12",
];

const PPT_MIMES: &[&str] = &[
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.openxmlformats-officedocument.presentationml.template",
    "application/vnd.openxmlformats-officedocument.presentationml.slideshow",
    "application/vnd.ms-powerpoint.addin.macroEnabled.12",
    "application/vnd.ms-powerpoint.presentation.macroEnabled.12",
    "application/vnd.ms-powerpoint.slideshow.macroEnabled.12",
];

const PSD_MIMES: &[&str] = &[
    "image/photoshop",
    "image/x-photoshop",
    "image/psd",
    "application/photoshop",
    "application/psd",
    "zz-application/zz-winassoc-psd",
];

/// Extension → class table for the fallback path.
const EXTENSION_CLASSES: &[(&str, &[&str])] = &[
    (
        "image",
        &[
            "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "svg", "psd", "nef",
            "cr2", "heic", "ico",
        ],
    ),
    ("video", &["mp4", "avi", "mkv", "mov", "wmv", "webm", "flv", "mpg", "mpeg", "m4v"]),
    ("audio", &["mp3", "wav", "wma", "m4a", "ogg", "flac", "aac", "mod"]),
    ("compress", &["zip", "rar", "7z", "gz", "tgz", "tar", "bz2", "xz", "cpio"]),
    ("pdf", &["pdf"]),
    ("doc", &["doc", "docx", "dot", "dotx", "docm", "odt", "rtf"]),
    ("xls", &["xls", "xlsx", "xlt", "xltx", "xlsm", "xlsb", "ods", "csv"]),
    ("ppt", &["ppt", "pptx", "pot", "potx", "pps", "ppsx", "pptm", "odp"]),
];

/// Returns the coarse class of a file: `image`, `video`, `audio`, `pdf`,
/// `compress`, `doc`, `xls`, `ppt`, or `application`.
pub fn mime_class(file: &FileDescriptor) -> &'static str {
    let mime = file.mime_type.as_str();
    let class = if PSD_MIMES.contains(&mime) || mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime == "application/pdf" {
        "pdf"
    } else if COMPRESS_MIMES.contains(&mime) {
        "compress"
    } else if DOC_MIMES.contains(&mime) {
        "doc"
    } else if XLS_MIMES.contains(&mime) {
        "xls"
    } else if PPT_MIMES.contains(&mime) {
        "ppt"
    } else {
        "application"
    };

    if class == "application" {
        class_from_extension(&file.name)
    } else {
        class
    }
}

fn class_from_extension(name: &str) -> &'static str {
    let Some(ext) = extension(name) else {
        return "application";
    };
    EXTENSION_CLASSES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(class, _)| *class)
        .unwrap_or("application")
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Guesses a MIME type from a file name, for files read from disk.
///
/// Returns `application/octet-stream` for unknown extensions.
pub fn guess_mime_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("js") => "text/javascript",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("psd") => "image/vnd.adobe.photoshop",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("7z") => "application/x-7z-compressed",
        Some("rar") => "application/vnd.rar",
        Some("doc") => "application/msword",
        Some("docx") => DOC_MIMES[1],
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => XLS_MIMES[1],
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => PPT_MIMES[1],
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, mime: &str) -> FileDescriptor {
        FileDescriptor {
            name: name.into(),
            size: 1,
            mime_type: mime.into(),
            last_modified: None,
        }
    }

    #[test]
    fn classifies_by_mime_prefix() {
        assert_eq!(mime_class(&descriptor("a", "image/png")), "image");
        assert_eq!(mime_class(&descriptor("a", "video/mp4")), "video");
        assert_eq!(mime_class(&descriptor("a", "audio/ogg")), "audio");
        assert_eq!(mime_class(&descriptor("a", "application/pdf")), "pdf");
    }

    #[test]
    fn classifies_office_and_archives() {
        assert_eq!(mime_class(&descriptor("a", "application/zip")), "compress");
        assert_eq!(mime_class(&descriptor("a", "application/msword")), "doc");
        assert_eq!(mime_class(&descriptor("a", "application/vnd.ms-excel")), "xls");
        assert_eq!(
            mime_class(&descriptor("a", "application/vnd.ms-powerpoint")),
            "ppt"
        );
        assert_eq!(mime_class(&descriptor("a", "image/x-photoshop")), "image");
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(mime_class(&descriptor("song.MP3", "")), "audio");
        assert_eq!(
            mime_class(&descriptor("report.docx", "application/octet-stream")),
            "doc"
        );
        assert_eq!(mime_class(&descriptor("data.bin", "")), "application");
        assert_eq!(mime_class(&descriptor(".hidden", "")), "application");
    }

    #[test]
    fn guesses_mime_from_name() {
        assert_eq!(guess_mime_type("a.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("notes.txt"), "text/plain");
        assert_eq!(guess_mime_type("archive.tar"), "application/x-tar");
        assert_eq!(guess_mime_type("noext"), "application/octet-stream");
    }
}
