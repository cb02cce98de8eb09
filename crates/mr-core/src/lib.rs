pub mod error;
pub mod object;
pub mod settings;
pub mod table;
pub mod types;
pub mod value;

pub use error::{MacroError, MacroErrorKind};
pub use object::{DomainObject, HierarchicalObject, MacroObject};
pub use settings::ResolverSettings;
pub use table::{tabular_names_match, DataRow, DataRowView, DataSet, DataTable, TabularValue};
pub use types::*;
pub use value::*;
