//! Pure edit primitives used by the applier

use serde_json::Value;

use crate::playbook::PROMPTS_DIR;

/// Replace the first occurrence of `old` with `new`
///
/// `None` when `old` does not occur.
pub fn replace_first(content: &str, old: &str, new: &str) -> Option<String> {
    let start = content.find(old)?;
    let mut out = String::with_capacity(content.len() - old.len() + new.len());
    out.push_str(&content[..start]);
    out.push_str(new);
    out.push_str(&content[start + old.len()..]);
    Some(out)
}

/// Path of the new prompt version next to `file_path`
///
/// The old version tag is the last `_`-separated part of the stem:
/// `prompts/pass1_extraction_v7.txt` with `v8` gives `prompts/pass1_extraction_v8.txt`.
pub fn derive_prompt_path(file_path: &str, version: &str) -> String {
    let (dir, file_name) = match file_path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => (PROMPTS_DIR, file_path),
    };
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let base = stem.rsplit_once('_').map(|(b, _)| b).unwrap_or(stem);
    format!("{}/{}_{}.txt", dir, base, version)
}

/// Set the value at a dotted path, returning the previous value
///
/// Every segment but the last must already exist. Numeric segments index
/// into arrays.
pub fn set_json_path(root: &mut Value, json_path: &str, value: Value) -> Result<Option<Value>, String> {
    let keys: Vec<&str> = json_path.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err("empty path segment".to_string());
    }
    let Some((last, parents)) = keys.split_last() else {
        return Err("empty path".to_string());
    };

    let mut target = root;
    for key in parents {
        target = match target {
            Value::Object(map) => map.get_mut(*key).ok_or_else(|| format!("key '{}' not found", key))?,
            Value::Array(items) => {
                let index = parse_index(key, items.len())?;
                &mut items[index]
            }
            _ => return Err(format!("'{}' is not an object or array", key)),
        };
    }

    match target {
        Value::Object(map) => Ok(map.insert((*last).to_string(), value)),
        Value::Array(items) => {
            let index = parse_index(last, items.len())?;
            Ok(Some(std::mem::replace(&mut items[index], value)))
        }
        _ => Err(format!("parent of '{}' is not an object or array", last)),
    }
}

fn parse_index(key: &str, len: usize) -> Result<usize, String> {
    let index: usize = key
        .parse()
        .map_err(|_| format!("'{}' is not an array index", key))?;
    if index >= len {
        return Err(format!("index {} out of bounds (len {})", index, len));
    }
    Ok(index)
}
