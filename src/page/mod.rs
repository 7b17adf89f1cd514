//! Page providers: interpret a raw 4 KiB frame as a typed page.
//!
//! Two table-row layouts are provided here, [`fixed`] and [`flexible`]; the
//! third provider, the B+tree page, lives in [`crate::btree`] since its
//! layout is intimately tied to tree traversal. A table is bound to exactly
//! one of the two row layouts at open time (`Layout`, below), chosen by the
//! CREATE TABLE statement's shape (no variable-length columns → fixed-row;
//! otherwise flexible-row).

pub mod fixed;
pub mod flexible;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("page has no room for another row")]
    PageFull,
    #[error(transparent)]
    Marshal(#[from] crate::marshal::Error),
}

/// Which row page layout a table uses. Chosen once at table creation and
/// recorded in the catalog alongside the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Fixed,
    Flexible,
}

impl Layout {
    /// A schema with any variable-length (`string`) column needs the
    /// flexible-row layout; an all-fixed-width schema can use the denser
    /// fixed-row layout.
    pub fn for_schema(schema: &crate::value::Schema) -> Layout {
        let has_variable = schema
            .columns()
            .iter()
            .any(|c| !c.column_type.is_fixed_width());
        if has_variable {
            Layout::Flexible
        } else {
            Layout::Fixed
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Layout::Fixed => "fixed",
            Layout::Flexible => "flexible",
        }
    }

    pub fn parse(name: &str) -> Option<Layout> {
        match name {
            "fixed" => Some(Layout::Fixed),
            "flexible" => Some(Layout::Flexible),
            _ => None,
        }
    }
}
