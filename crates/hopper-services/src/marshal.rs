//! Parameter marshaling between host values and solve requests.
//!
//! Inbound, one host iteration becomes one [`SolveRequest`]: each described
//! input is read with the access its description implies, validated, and
//! encoded into a named tree. Outbound, a [`SolveResponse`] is decoded back
//! into named [`DataTree`]s of [`Value`]s.

use std::collections::HashMap;

use hopper_core::codec::{CodecRegistry, Value};
use hopper_core::config::DocumentSettings;
use hopper_core::schema::{IoDescription, InputParam, ParamTree, SolveRequest, SolveResponse};
use hopper_core::tree::{DataTree, TreePath};

// ── Host side ─────────────────────────────────────────────────────────────────

/// What the host knows about one iteration of a component.
pub trait IterationInputs {
    /// Index of this iteration within the evaluation pass.
    fn iteration(&self) -> usize;

    /// Items for `name` in this iteration. None = the input has no data.
    fn values(&self, name: &str) -> Option<Vec<Value>>;

    /// Branch the iteration's items for `name` came from.
    fn path(&self, _name: &str) -> TreePath {
        TreePath::root()
    }

    /// Whole tree for inputs read with tree access.
    fn tree(&self, name: &str) -> Option<DataTree<Value>> {
        let values = self.values(name)?;
        let mut tree = DataTree::new();
        let path = self.path(name);
        tree.ensure_branch(&path).extend(values);
        Some(tree)
    }

    /// True when any input carries more than one branch.
    fn has_tree_input(&self) -> bool {
        false
    }
}

/// Inputs held in memory; what a headless host or a test hands over.
#[derive(Debug, Clone, Default)]
pub struct MemoryIteration {
    iteration: usize,
    inputs: HashMap<String, DataTree<Value>>,
}

impl MemoryIteration {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            inputs: HashMap::new(),
        }
    }

    /// Items for `name` on the `{0}` branch.
    pub fn with_values(mut self, name: &str, values: Vec<Value>) -> Self {
        let mut tree = DataTree::new();
        tree.ensure_branch(&TreePath::root()).extend(values);
        self.inputs.insert(name.to_string(), tree);
        self
    }

    pub fn with_tree(mut self, name: &str, tree: DataTree<Value>) -> Self {
        self.inputs.insert(name.to_string(), tree);
        self
    }
}

impl IterationInputs for MemoryIteration {
    fn iteration(&self) -> usize {
        self.iteration
    }

    fn values(&self, name: &str) -> Option<Vec<Value>> {
        let tree = self.inputs.get(name)?;
        let (_, items) = tree.iter().next()?;
        Some(items.to_vec())
    }

    fn path(&self, name: &str) -> TreePath {
        self.inputs
            .get(name)
            .and_then(|tree| tree.paths().next().cloned())
            .unwrap_or_else(TreePath::root)
    }

    fn tree(&self, name: &str) -> Option<DataTree<Value>> {
        self.inputs.get(name).cloned()
    }

    fn has_tree_input(&self) -> bool {
        self.inputs.values().any(|tree| tree.branch_count() > 1)
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// How an input is read from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Item,
    List,
    Tree,
}

impl Access {
    pub fn for_input(input: &InputParam) -> Self {
        if input.tree_access {
            return Access::Tree;
        }
        match (input.at_least, input.at_most) {
            (1, 1) => Access::Item,
            (-1, -1) => Access::Tree,
            _ => Access::List,
        }
    }
}

/// A marshaled iteration plus what validation found. An iteration with any
/// warning or error is not submitted.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub request: SolveRequest,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl PreparedInput {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Marshal one iteration against a definition description. The returned
/// request names no definition yet; the caller sets its pointer or algo.
pub fn build_request(
    description: &IoDescription,
    inputs: &dyn IterationInputs,
    codecs: &CodecRegistry,
    settings: &DocumentSettings,
    cache_solve: bool,
    recursion_level: u32,
) -> PreparedInput {
    let mut request = SolveRequest::new(settings);
    request.cache_solve = cache_solve;
    request.recursion_level = recursion_level;

    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for input in &description.inputs {
        let name = input.display_name();
        let mut param = ParamTree::new(input.name.clone());

        if let Err(e) = codecs.check_param_type(&input.param_type) {
            errors.push(e.to_string());
            request.values.push(param);
            continue;
        }

        let access = Access::for_input(input);
        let count = match access {
            Access::Item | Access::List => {
                let path = inputs.path(name);
                let mut values = inputs.values(name).unwrap_or_default();
                if access == Access::Item {
                    values.truncate(1);
                }
                let count = values.len();
                for value in &values {
                    if !within_bounds(value, input, &mut errors) {
                        break;
                    }
                    encode_into(&mut param, &path, value, codecs, &mut errors);
                }
                count
            }
            Access::Tree => {
                let tree = inputs.tree(name).unwrap_or_default();
                'branches: for (path, items) in tree.iter() {
                    for value in items {
                        if !within_bounds(value, input, &mut errors) {
                            break 'branches;
                        }
                        encode_into(&mut param, path, value, codecs, &mut errors);
                    }
                }
                tree.item_count()
            }
        };

        if access == Access::List {
            if (count as i64) < i64::from(input.at_least) {
                warnings.push(format!("{name} requires at least {} items", input.at_least));
            }
            if input.at_most >= 0 && count as i64 > i64::from(input.at_most) {
                warnings.push(format!("{name} requires at most {} items", input.at_most));
            }
        }

        request.values.push(param);
    }

    PreparedInput {
        request,
        warnings,
        errors,
    }
}

fn within_bounds(value: &Value, input: &InputParam, errors: &mut Vec<String>) -> bool {
    let Some(v) = value.as_f64() else {
        return true;
    };
    let name = input.display_name();
    if let Some(min) = input.minimum {
        if v < min {
            errors.push(format!(
                "{name} value must be greater than the specified minimum value of the parameter"
            ));
            return false;
        }
    }
    if let Some(max) = input.maximum {
        if v > max {
            errors.push(format!(
                "{name} value must be smaller than the specified maximum value of the parameter"
            ));
            return false;
        }
    }
    true
}

fn encode_into(
    param: &mut ParamTree,
    path: &TreePath,
    value: &Value,
    codecs: &CodecRegistry,
    errors: &mut Vec<String>,
) {
    match codecs.encode(value) {
        Ok(wire) => param.tree.append(path, wire),
        Err(e) => errors.push(format!("{}: {e}", param.param_name)),
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// One decoded output; `errors` holds items that failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOutput {
    pub name: String,
    pub tree: DataTree<Value>,
    pub errors: Vec<String>,
}

/// Everything a solve hands back to the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentOutputs {
    pub outputs: Vec<ComponentOutput>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ComponentOutputs {
    pub fn output(&self, name: &str) -> Option<&ComponentOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Fold another iteration's outputs in, branch by branch.
    pub fn merge(&mut self, other: ComponentOutputs) {
        for incoming in other.outputs {
            match self.outputs.iter_mut().find(|o| o.name == incoming.name) {
                Some(existing) => {
                    for (path, items) in incoming.tree.iter() {
                        existing.tree.ensure_branch(path).extend(items.iter().cloned());
                    }
                    existing.errors.extend(incoming.errors);
                }
                None => self.outputs.push(incoming),
            }
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Decode a response for one iteration.
///
/// A single-branch output with no tree-shaped input is re-addressed so the
/// branch's last index is the iteration; that keeps outputs of a data-parallel
/// pass from landing on the same branch.
pub fn assemble_outputs(
    response: &SolveResponse,
    iteration: usize,
    has_tree_input: bool,
    codecs: &CodecRegistry,
) -> ComponentOutputs {
    let mut outputs = Vec::with_capacity(response.values.len());

    for param in &response.values {
        let name = param
            .param_name
            .rsplit(':')
            .next()
            .unwrap_or(&param.param_name)
            .trim()
            .to_string();
        let readdress = param.tree.branch_count() == 1 && !has_tree_input;

        let mut tree = DataTree::new();
        let mut errors = Vec::new();
        for (path, items) in param.tree.iter() {
            let path = if readdress {
                path.with_last(iteration as u32)
            } else {
                path.clone()
            };
            let branch = tree.ensure_branch(&path);
            for item in items {
                match codecs.decode(item) {
                    Ok(value) => branch.push(value),
                    Err(e) => errors.push(format!("{name}: {e}")),
                }
            }
        }

        outputs.push(ComponentOutput { name, tree, errors });
    }

    ComponentOutputs {
        outputs,
        errors: response.errors.clone(),
        warnings: response.warnings.clone(),
    }
}
