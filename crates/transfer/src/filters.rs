use std::fmt;
use std::sync::Arc;

use crate::mime_class::mime_class;
use crate::{FileDescriptor, UploadError, UploadOptions};

/// Name of the built-in maximum size filter.
pub const FILE_SIZE_FILTER: &str = "fileSize";
/// Name of the built-in file class filter.
pub const FILE_TYPE_FILTER: &str = "fileType";
/// Name of the built-in MIME type filter.
pub const MIME_TYPE_FILTER: &str = "mimeType";

/// Predicate deciding whether a file may be uploaded.
pub type FilterFn = Arc<dyn Fn(&FileDescriptor, &UploadOptions) -> bool + Send + Sync>;

/// A named file predicate. The name is reported when the filter rejects.
#[derive(Clone)]
pub struct Filter {
    name: String,
    predicate: FilterFn,
}

impl Filter {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&FileDescriptor, &UploadOptions) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the file passes this filter.
    pub fn check(&self, file: &FileDescriptor, options: &UploadOptions) -> bool {
        (self.predicate)(file, options)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

struct BuiltinFilter {
    name: &'static str,
    enabled: fn(&UploadOptions) -> bool,
    predicate: fn(&FileDescriptor, &UploadOptions) -> bool,
}

/// Built-in filters in insertion order. Each enabled entry is inserted at
/// the front of the chain, so evaluation order is the reverse of this table.
const BUILTIN_FILTERS: [BuiltinFilter; 3] = [
    BuiltinFilter {
        name: FILE_SIZE_FILTER,
        enabled: has_max_file_size,
        predicate: file_size_filter,
    },
    BuiltinFilter {
        name: FILE_TYPE_FILTER,
        enabled: has_allowed_file_type,
        predicate: file_type_filter,
    },
    BuiltinFilter {
        name: MIME_TYPE_FILTER,
        enabled: has_allowed_mime_type,
        predicate: mime_type_filter,
    },
];

/// Assembles the filter chain for `options`.
///
/// Resulting order: `mimeType`, `fileType`, `fileSize` (each only when its
/// option is set), followed by the custom filters from `options.filters`.
pub fn build_filter_chain(options: &UploadOptions) -> Vec<Filter> {
    let mut chain = options.filters.clone();
    for builtin in &BUILTIN_FILTERS {
        if (builtin.enabled)(options) {
            chain.insert(0, Filter::new(builtin.name, builtin.predicate));
        }
    }
    chain
}

/// Runs `chain` in order and fails on the first rejecting filter.
///
/// An empty chain accepts every file.
pub fn run_filters(
    chain: &[Filter],
    file: &FileDescriptor,
    options: &UploadOptions,
) -> Result<bool, UploadError> {
    for filter in chain {
        if !filter.check(file, options) {
            return Err(UploadError::Validation {
                filter: filter.name().to_string(),
            });
        }
    }
    Ok(true)
}

fn has_max_file_size(options: &UploadOptions) -> bool {
    options.max_file_size.is_some()
}

fn has_allowed_file_type(options: &UploadOptions) -> bool {
    options.allowed_file_type.is_some()
}

fn has_allowed_mime_type(options: &UploadOptions) -> bool {
    options.allowed_mime_type.is_some()
}

fn file_size_filter(file: &FileDescriptor, options: &UploadOptions) -> bool {
    options.max_file_size.is_none_or(|max| file.size <= max)
}

fn file_type_filter(file: &FileDescriptor, options: &UploadOptions) -> bool {
    options
        .allowed_file_type
        .as_ref()
        .is_none_or(|allowed| allowed.iter().any(|class| class == mime_class(file)))
}

fn mime_type_filter(file: &FileDescriptor, options: &UploadOptions) -> bool {
    options
        .allowed_mime_type
        .as_ref()
        .is_none_or(|allowed| allowed.iter().any(|mime| *mime == file.mime_type))
}
