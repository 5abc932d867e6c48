//! Transform export discovery.
//!
//! Guests advertise transforms through their export names:
//!
//! ```text
//! _cqtransform_<filter>@@<anything>
//! ```
//!
//! `<filter>` is a glob over table names. Quote characters inside it are
//! dropped, so `_cqtransform_"users"@@v1` applies to the `users` table.
//! Exports that carry the prefix but no `@@` are not transforms.

/// Prefix shared by every transform export.
pub const TRANSFORM_PREFIX: &str = "_cqtransform_";

/// Separates the filter from the rest of a transform export name.
pub const FILTER_DELIMITER: &str = "@@";

/// A guest export recognized as a transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformDescriptor {
    /// Full export name, used to call the function.
    pub export_name: String,
    /// Glob matched against table names.
    pub filter_pattern: String,
}

impl TransformDescriptor {
    /// Returns `true` if this transform applies to `table`.
    pub fn matches(&self, table: &str) -> bool {
        crate::glob::matches(&self.filter_pattern, table)
    }
}

/// Parse a single export name.
///
/// Returns `None` for exports that do not follow the naming convention.
pub fn parse_transform_export(export_name: &str) -> Option<TransformDescriptor> {
    let rest = export_name.strip_prefix(TRANSFORM_PREFIX)?;
    let end = rest.find(FILTER_DELIMITER)?;

    let filter_pattern = rest[..end]
        .chars()
        .filter(|c| !matches!(c, '"' | '\''))
        .collect();

    Some(TransformDescriptor {
        export_name: export_name.to_string(),
        filter_pattern,
    })
}

/// Build descriptors for every transform among `export_names`.
///
/// The output preserves the input order, which is the order transforms are
/// applied in when several match the same table.
pub fn discover_transforms<'a>(
    export_names: impl IntoIterator<Item = &'a str>,
) -> Vec<TransformDescriptor> {
    export_names
        .into_iter()
        .filter_map(parse_transform_export)
        .collect()
}
