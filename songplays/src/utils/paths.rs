use object_store::path::Path;

/// Directory value used when a partition column is null.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

pub struct PathBuilder {
    root: Path,
    table: String,
    partitions: Vec<(String, String)>,
}

impl PathBuilder {
    pub fn new(root: &Path, table: &str) -> Self {
        Self {
            root: root.clone(),
            table: table.to_string(),
            partitions: Vec::new(),
        }
    }

    pub fn with_partition(mut self, column: &str, value: Option<&str>) -> Self {
        self.partitions
            .push((column.to_string(), partition_dir_value(value)));
        self
    }

    pub fn build_table_path(&self) -> Path {
        self.root.child(self.table.as_str())
    }

    /// `<root>/<table>/<col>=<value>/...`
    pub fn build_partition_path(&self) -> Path {
        self.partitions
            .iter()
            .fold(self.build_table_path(), |path, (column, value)| {
                path.child(format!("{}={}", column, value))
            })
    }

    pub fn build_file_path(&self, filename: &str) -> Path {
        self.build_partition_path().child(filename)
    }
}

/// Directory value for a partition column. Characters that are illegal in
/// a path segment are percent-encoded when the segment becomes a `PathPart`.
pub fn partition_dir_value(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => DEFAULT_PARTITION.to_string(),
    }
}
