// MIDB - GDB Machine Interface Frontend
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Lazy mirror of the debugger's variable objects.
//!
//! Roots own their children. A node's parent is kept as the parent's
//! debugger name, and every lookup walks down from the root whose name is
//! the first dot segment (`var9.a.b` lives under `var9`, then `var9.a`).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::record::{int_field, str_field};

/// Fields gdb inserts into C++ class children; they are not real members.
const ACCESS_SPECIFIERS: [&str; 3] = ["public", "private", "protected"];

/// Marker gdb uses in the `exp` of unnamed struct/union members
const ANONYMOUS_MARKER: &str = "<anonymous";

const MAX_PATH_DEPTH: usize = 100;

static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)")
        .unwrap_or_else(|_| unreachable!("valid float regex"))
});

/// Why a variable object exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprType {
    /// Created to explore a local of the selected frame
    Local,
    /// Created from an expression the user watches
    Watch,
    /// Created while the user hovers a token in the source
    Hover,
}

/// `in_scope` of a variable object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Value is current
    #[default]
    True,
    /// Out of scope in the selected frame; value is stale
    False,
    /// Can no longer be evaluated and must be deleted
    Invalid,
}

impl Scope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }
}

/// One created or discovered debugger value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarObj {
    /// Debugger-assigned unique name
    pub name: String,
    /// Expression the user entered (roots only)
    pub expression: Option<String>,
    /// Field or index name within the parent
    pub exp: Option<String>,
    /// Raw textual value
    pub value: String,
    /// Type as printed by the debugger
    #[serde(rename = "type")]
    pub var_type: String,
    /// Declared number of children; may exceed what has been fetched
    pub numchild: usize,
    /// Whether a pretty printer reports more children
    pub has_more: bool,
    /// Whether the value comes from a pretty printer
    pub dynamic: bool,
    /// Thread the value belongs to
    pub thread_id: Option<String>,
    /// Children fetched so far
    pub children: Vec<VarObj>,
    /// Whether the renderer shows the children
    pub show_children_in_ui: bool,
    /// Debugger name of the parent, `None` for roots
    pub parent: Option<String>,
    /// Purpose of the variable
    pub expr_type: ExprType,
    /// Scope reported by the last update
    pub in_scope: Scope,
    /// Value parsed as a number, if it is one
    pub float_value: Option<f64>,
    /// Whether the value is numeric
    pub is_numeric: bool,
    /// Whether the value is a whole number
    pub is_int: bool,
    /// Whether successive values can be plotted
    pub can_plot: bool,
    /// Whether the renderer shows the plot
    pub show_plot: bool,
    /// Base the integer value is displayed in; 0 when not an integer
    pub radix: u32,
    /// Value history for plotting
    pub values: Vec<f64>,
    /// Integer value rendered in `radix`
    pub display_value: Option<String>,
}

impl VarObj {
    /// Build a node from a `-var-create` result or a child tuple.
    ///
    /// Returns `None` when the tuple carries no `name`.
    pub fn from_mi(mi: &Value, parent: Option<&str>, expr_type: ExprType) -> Option<Self> {
        let name = str_field(mi, "name")?.to_string();
        let dynamic = str_field(mi, "dynamic") == Some("1");
        let has_more = int_field(mi, "has_more").unwrap_or(0) != 0;
        let numchild = if dynamic { int_field(mi, "has_more") } else { int_field(mi, "numchild") };

        let mut obj = Self {
            name,
            expression: None,
            exp: str_field(mi, "exp").map(str::to_string),
            value: str_field(mi, "value").unwrap_or_default().to_string(),
            var_type: str_field(mi, "type").unwrap_or_default().to_string(),
            numchild: numchild.unwrap_or(0).max(0) as usize,
            has_more,
            dynamic,
            thread_id: str_field(mi, "thread-id").map(str::to_string),
            children: Vec::new(),
            show_children_in_ui: false,
            parent: parent.map(str::to_string),
            expr_type,
            in_scope: Scope::True,
            float_value: None,
            is_numeric: false,
            is_int: false,
            can_plot: false,
            show_plot: false,
            radix: 0,
            values: Vec::new(),
            display_value: None,
        };

        obj.update_numeric();
        if obj.value.starts_with("0x") {
            obj.values = obj.float_value.into_iter().collect();
            obj.radix = 16;
        } else if let Some(value) = obj.float_value {
            obj.values = vec![value];
            obj.radix = if obj.is_int { 10 } else { 0 };
        }
        obj.update_radix_display();
        Some(obj)
    }

    /// Whether the children list still has to be fetched
    pub fn needs_children(&self) -> bool {
        self.numchild > 0 && self.children.is_empty()
    }

    /// Whether this child stands for an anonymous struct or union
    pub fn is_anonymous(&self) -> bool {
        self.exp.as_deref().is_some_and(|e| e.contains(ANONYMOUS_MARKER))
    }

    /// Step to the next display base: 16 wraps to 2, everything else adds 2.
    ///
    /// Returns the new base, or `None` when the value is not an integer.
    pub fn cycle_radix(&mut self) -> Option<u32> {
        if !self.is_int {
            return None;
        }
        self.radix = if self.radix == 16 { 2 } else { self.radix + 2 };
        if self.radix > 36 {
            self.radix = 2;
        }
        self.update_radix_display();
        Some(self.radix)
    }

    fn update_numeric(&mut self) {
        self.float_value = match self.value.strip_prefix("0x") {
            Some(hex) => parse_hex_prefix(hex).map(|v| v as f64),
            None => parse_float_prefix(&self.value),
        };
        self.is_numeric = self.float_value.is_some();
        self.can_plot = self.is_numeric && self.expr_type == ExprType::Watch;
        self.is_int = self.float_value.is_some_and(|v| v.fract() == 0.0);
    }

    fn update_radix_display(&mut self) {
        if !self.is_int {
            self.display_value = None;
            return;
        }
        if !(2..=36).contains(&self.radix) {
            warn!(name = %self.name, radix = self.radix, "Invalid radix, falling back to 10");
            self.radix = 10;
        }
        self.display_value = parse_int_prefix(&self.value).map(|v| {
            let digits = format_radix(v, self.radix);
            if self.radix == 16 {
                format!("0x{digits}")
            } else {
                digits
            }
        });
    }

    fn merge_scalars(&mut self, entry: &Value) {
        if let Some(value) = str_field(entry, "value") {
            self.value = value.to_string();
        }
        if let Some(var_type) = str_field(entry, "type") {
            self.var_type = var_type.to_string();
        }
        if str_field(entry, "type_changed") == Some("true") {
            if let Some(new_type) = str_field(entry, "new_type") {
                self.var_type = new_type.to_string();
            }
        }
        if let Some(scope) = str_field(entry, "in_scope").and_then(Scope::parse) {
            self.in_scope = scope;
        }
        if let Some(n) = int_field(entry, "new_num_children") {
            self.numchild = n.max(0) as usize;
        }
        if let Some(n) = int_field(entry, "has_more") {
            self.has_more = n != 0;
        }
        if let Some(dynamic) = str_field(entry, "dynamic") {
            self.dynamic = dynamic == "1";
        }
    }

    fn collect_update_commands(&self, out: &mut Vec<String>) {
        out.push(format!("-var-update --all-values {}", self.name));
        for child in &self.children {
            child.collect_update_commands(out);
        }
    }
}

/// Result of merging one changelist entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The name is not in the tree; nothing changed
    Unknown,
    /// Fields were merged
    Updated {
        /// The debugger has more children than we fetched
        refetch_children: bool,
    },
    /// The entry marked the variable invalid and it was removed
    Removed,
}

/// All variable objects of the session
#[derive(Debug, Clone, Default, Serialize)]
pub struct VarObjTree {
    roots: Vec<VarObj>,
}

impl VarObjTree {
    /// An empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Root nodes in creation order
    pub fn roots(&self) -> &[VarObj] {
        &self.roots
    }

    /// Number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the tree has no roots
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Add a root, replacing a stale node of the same name
    pub fn insert_root(&mut self, obj: VarObj) {
        match self.roots.iter_mut().find(|r| r.name == obj.name) {
            Some(existing) => *existing = obj,
            None => self.roots.push(obj),
        }
    }

    /// Resolve a dot-path name
    pub fn find(&self, name: &str) -> Option<&VarObj> {
        let mut segments = name.split('.');
        let root_name = segments.next()?;
        let mut node = self.roots.iter().find(|r| r.name == root_name)?;
        let mut path = root_name.to_string();
        for segment in segments {
            path.push('.');
            path.push_str(segment);
            match node.children.iter().find(|c| c.name == path) {
                Some(child) => node = child,
                None => {
                    debug!(%name, missing = %path, "Variable path not found");
                    return None;
                }
            }
        }
        Some(node)
    }

    /// Resolve a dot-path name for mutation
    pub fn find_mut(&mut self, name: &str) -> Option<&mut VarObj> {
        let mut segments = name.split('.');
        let root_name = segments.next()?;
        let mut node = self.roots.iter_mut().find(|r| r.name == root_name)?;
        let mut path = root_name.to_string();
        for segment in segments {
            path.push('.');
            path.push_str(segment);
            node = node.children.iter_mut().find(|c| c.name == path)?;
        }
        Some(node)
    }

    /// The root created for `expression` with the given purpose
    pub fn find_root_by_expression(&self, expression: &str, expr_type: ExprType) -> Option<&VarObj> {
        self.roots
            .iter()
            .find(|r| r.expr_type == expr_type && r.expression.as_deref() == Some(expression))
    }

    /// Replace the children of `parent`.
    ///
    /// Returns the names of anonymous children, which callers expand right
    /// away, or `None` if the parent is unknown.
    pub fn set_children(&mut self, parent: &str, children: Vec<VarObj>) -> Option<Vec<String>> {
        let node = self.find_mut(parent)?;
        node.numchild = children.len();
        node.children = children;
        Some(node.children.iter().filter(|c| c.is_anonymous()).map(|c| c.name.clone()).collect())
    }

    /// Append children to `parent`, keeping the ones already fetched
    pub fn append_children(&mut self, parent: &str, children: Vec<VarObj>) -> bool {
        match self.find_mut(parent) {
            Some(node) => {
                node.children.extend(children);
                true
            }
            None => false,
        }
    }

    /// Merge one `changelist` entry of `-var-update`
    pub fn apply_change(&mut self, entry: &Value) -> ChangeOutcome {
        let Some(name) = str_field(entry, "name") else {
            return ChangeOutcome::Unknown;
        };
        let Some(node) = self.find_mut(name) else {
            debug!(%name, "Changelist for unknown variable");
            return ChangeOutcome::Unknown;
        };

        let refetch_children = int_field(entry, "has_more") == Some(1);

        if let Some(new_children) = entry.get("new_children").and_then(Value::as_array) {
            let parent = node.name.clone();
            let expr_type = node.expr_type;
            node.children.extend(
                new_children.iter().filter_map(|c| VarObj::from_mi(c, Some(&parent), expr_type)),
            );
        }

        node.merge_scalars(entry);
        node.update_numeric();
        node.update_radix_display();
        if node.can_plot {
            if let Some(value) = node.float_value {
                node.values.push(value);
            }
        }

        if node.in_scope == Scope::Invalid {
            let name = node.name.clone();
            self.remove(&name);
            return ChangeOutcome::Removed;
        }
        ChangeOutcome::Updated { refetch_children }
    }

    /// Remove a node and everything below it
    pub fn remove(&mut self, name: &str) -> Option<VarObj> {
        match self.find(name)?.parent.clone() {
            None => {
                let index = self.roots.iter().position(|r| r.name == name)?;
                Some(self.roots.remove(index))
            }
            Some(parent) => {
                let node = self.find_mut(&parent)?;
                let index = node.children.iter().position(|c| c.name == name)?;
                Some(node.children.remove(index))
            }
        }
    }

    /// Source-level expression of a node, e.g. `s.inner.x`.
    ///
    /// Access specifier segments injected for C++ classes are skipped.
    pub fn full_expression_path(&self, name: &str) -> Option<String> {
        let mut node = self.find(name)?;
        let mut path = String::new();
        for _ in 0..MAX_PATH_DEPTH {
            let segment =
                node.expression.as_deref().or(node.exp.as_deref()).unwrap_or(node.name.as_str());
            if !ACCESS_SPECIFIERS.contains(&segment) {
                path = if path.is_empty() { segment.to_string() } else { format!("{segment}.{path}") };
            }
            match node.parent.as_deref() {
                Some(parent) => node = self.find(parent)?,
                None => return Some(path),
            }
        }
        warn!(%name, "Exceeded maximum variable depth");
        Some(path)
    }

    /// Flip the plot flag of a node
    pub fn toggle_plot(&mut self, name: &str) -> Option<bool> {
        let node = self.find_mut(name)?;
        node.show_plot = !node.show_plot;
        Some(node.show_plot)
    }

    /// Cycle the display radix of a node
    pub fn cycle_radix(&mut self, name: &str) -> Option<u32> {
        self.find_mut(name)?.cycle_radix()
    }

    /// `-var-update` for every node, parents before children
    pub fn update_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        for root in &self.roots {
            root.collect_update_commands(&mut commands);
        }
        commands
    }

    /// Names of the roots created for `expr_type`
    pub fn root_names_of_type(&self, expr_type: ExprType) -> Vec<String> {
        self.roots.iter().filter(|r| r.expr_type == expr_type).map(|r| r.name.clone()).collect()
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.roots.clear();
    }
}

/// Leading decimal number of `s`, the way a lenient float parser reads it
/// (`"97 'a'"` is 97, `"{...}"` is not a number).
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let m = FLOAT_PREFIX.find(s)?;
    let text = m.as_str();
    match text.trim_start_matches(['+', '-']) {
        "Infinity" if text.starts_with('-') => Some(f64::NEG_INFINITY),
        "Infinity" => Some(f64::INFINITY),
        _ => text.parse().ok(),
    }
}

/// Leading hex digits of `s`
fn parse_hex_prefix(s: &str) -> Option<u128> {
    let end = s.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(s.len());
    u128::from_str_radix(&s[..end], 16).ok()
}

/// Leading integer of `s`; a `0x` prefix switches to base 16
fn parse_int_prefix(s: &str) -> Option<i128> {
    let s = s.trim_start();
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let magnitude = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        Some(hex) => i128::try_from(parse_hex_prefix(hex)?).ok()?,
        None => {
            let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            rest[..end].parse::<i128>().ok()?
        }
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn format_radix(value: i128, radix: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut n = value.unsigned_abs();
    let radix = u128::from(radix);
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % radix) as usize]);
        n /= radix;
    }
    if value < 0 {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
