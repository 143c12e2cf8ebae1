use serde::{Deserialize, Serialize};

/// A column shown when a collection is printed as a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintColumn {
    pub name: String,
    /// Display type hint: `string`, `integer`, `date`, ...
    #[serde(rename = "type")]
    pub column_type: String,
    /// Path into the object, e.g. `.spec.replicas`.
    pub json_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Columns with priority > 0 are only shown in wide output.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
}

impl PrintColumn {
    pub fn new(
        name: impl Into<String>,
        column_type: impl Into<String>,
        json_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            json_path: json_path.into(),
            ..Self::default()
        }
    }
}

/// Optional sub-endpoints a collection exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subresources {
    /// When set, `status` is only writable through the status sub-client and
    /// main updates preserve it.
    #[serde(default)]
    pub status: bool,
}

/// Query metadata registered per collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub singular: String,
    pub plural: String,
    pub kind: String,
    /// Filled with `{kind}List` on registration when empty.
    #[serde(default)]
    pub list_kind: String,
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default)]
    pub short_names: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub print_columns: Vec<PrintColumn>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subresources: Subresources,
}

impl ResourceDescriptor {
    pub fn new(
        singular: impl Into<String>,
        plural: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            singular: singular.into(),
            plural: plural.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    pub fn short_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.short_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn print_column(mut self, column: PrintColumn) -> Self {
        self.print_columns.push(column);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status_subresource(mut self) -> Self {
        self.subresources.status = true;
        self
    }
}
