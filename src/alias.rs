//! The `CurrentControlSet` alias.
//!
//! Windows exposes `CurrentControlSet` as a link to the numbered control set
//! named by `Select\Current`. Only a key named `System` or the root key of a
//! hive can carry the alias. It gets a synthesised `CurrentControlSet` child
//! when it has a `Select` child whose `Current` value is a REG_DWORD in
//! 1..=999 and a matching `ControlSetNNN` child. The alias replaces a literal
//! key of the same name. Without a usable `Select\Current` the name is left
//! to whatever the hive holds.

use crate::error::Result;
use crate::key_path::{self, names_equal};
use crate::node::KeyNode;
use crate::value::ValueData;
use tracing::{debug, warn};

/// Name of the alias key.
pub const CURRENT_CONTROL_SET: &str = "CurrentControlSet";

/// Name of the key holding the control sets below a hive root.
pub const SYSTEM_KEY: &str = "System";

/// Name of the key holding the control set selection.
pub const SELECT_KEY: &str = "Select";

/// Value under `Select` naming the active control set.
pub const CURRENT_VALUE: &str = "Current";

/// Highest control set number Windows accepts.
pub const MAX_CONTROL_SET: u64 = 999;

/// Reads `Select\Current`, returning the control set number if it is usable.
pub fn current_control_set(select: &KeyNode) -> Option<u32> {
    let value = match select.value(CURRENT_VALUE) {
        Ok(value) => value,
        Err(e) if e.is_not_found() => return None,
        Err(e) => {
            warn!(key = %select.path(), error = %e, "Unable to read Select\\Current");
            return None;
        }
    };

    match value.data() {
        Ok(ValueData::Dword(number)) if (1..=MAX_CONTROL_SET).contains(&u64::from(number)) => Some(number),
        Ok(other) => {
            warn!(
                key = %select.path(),
                data_type = %value.data_type_name(),
                data = %other,
                "Select\\Current does not name a control set"
            );
            None
        }
        Err(e) => {
            warn!(key = %select.path(), error = %e, "Malformed Select\\Current");
            None
        }
    }
}

/// Name of the numbered control set, e.g. `ControlSet001`.
pub fn control_set_name(number: u32) -> String {
    format!("ControlSet{:03}", number)
}

fn find<'a>(children: &'a [Result<KeyNode>], name: &str) -> Option<&'a KeyNode> {
    children.iter().find_map(|child| match child {
        Ok(node) if names_equal(node.name(), name) => Some(node),
        _ => None,
    })
}

/// Whether `key` is where Windows keeps control sets: `System`, or a hive root.
fn holds_control_sets(key: &KeyNode) -> bool {
    if names_equal(key.name(), SYSTEM_KEY) {
        return true;
    }
    match (key.source(), key.offset()) {
        (Some(source), Some(offset)) => offset == source.root_cell_offset(),
        _ => false,
    }
}

/// Adds the `CurrentControlSet` alias to `children` of `parent` where it resolves.
pub(crate) fn attach_current_control_set(parent: &KeyNode, children: &mut Vec<Result<KeyNode>>) {
    if !holds_control_sets(parent) {
        return;
    }
    let Some(select) = find(children, SELECT_KEY) else {
        return;
    };
    let Some(number) = current_control_set(select) else {
        return;
    };

    let target_name = control_set_name(number);
    let Some(target) = find(children, &target_name) else {
        debug!(key = %parent.path(), target = %target_name, "Selected control set is missing");
        return;
    };

    let alias = target.relabel(
        CURRENT_CONTROL_SET.to_string(),
        key_path::child(parent.path(), CURRENT_CONTROL_SET),
    );

    children.retain(|child| !matches!(child, Ok(node) if names_equal(node.name(), CURRENT_CONTROL_SET)));
    children.push(Ok(alias));
}
