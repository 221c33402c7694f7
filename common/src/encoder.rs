use crate::{Error, Result};
use serde::Serialize;

/// Indentation placing the list under the header's `  resources:` key
const INDENT: &str = "    ";

#[derive(Serialize)]
struct Data {
    resources: Vec<serde_json::Value>,
}

/// Encodes resources into the YAML fragment stored inside a block.
///
/// Every resource goes through a neutral JSON value first, then the list is
/// serialized under a `resources` key. That first line is dropped since the
/// document header provides it once for all blocks.
pub fn encode_resources<T: Serialize>(resources: &[T]) -> Result<String> {
    let data = Data {
        resources: resources
            .iter()
            .enumerate()
            .map(|(index, r)| serde_json::to_value(r).map_err(|source| Error::Encoding { index, source }))
            .collect::<Result<Vec<_>>>()?,
    };
    let yaml = serde_yaml::to_string(&data)?;
    match yaml.split_once('\n') {
        None => Ok(yaml),
        Some((_, rest)) => Ok(indent(rest)),
    }
}

fn indent(yaml: &str) -> String {
    yaml.split_inclusive('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{INDENT}{line}")
            }
        })
        .collect()
}
