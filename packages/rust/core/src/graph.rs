//! Stage dependency graph: the shared prefix chain plus the per-field
//! subflow, validated when built.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use styleguide_shared::{Result, StyleGuideError};

use crate::contract::StageContract;
use crate::stages::{self, keys};

/// One stage of the shared prefix.
#[derive(Debug, Clone)]
pub struct PrefixNode {
    pub contract: StageContract,
    /// Stages that must succeed before this one runs.
    pub depends_on: Vec<String>,
    /// Resolve guidance from the knowledge store as part of each attempt.
    pub loads_knowledge: bool,
    /// This node's `fields` output defines the per-field fan-out.
    pub declares_fields: bool,
}

impl PrefixNode {
    pub fn new(contract: StageContract) -> Self {
        Self {
            contract,
            depends_on: Vec::new(),
            loads_knowledge: false,
            declares_fields: false,
        }
    }

    pub fn after(mut self, stage: &str) -> Self {
        self.depends_on.push(stage.to_string());
        self
    }

    pub fn with_knowledge(mut self) -> Self {
        self.loads_knowledge = true;
        self
    }

    pub fn declaring_fields(mut self) -> Self {
        self.declares_fields = true;
        self
    }

    pub fn name(&self) -> &str {
        self.contract.name()
    }
}

/// The construct → review → refine stages instantiated per field.
#[derive(Debug, Clone)]
pub struct FieldSubflow {
    pub construction: StageContract,
    pub review: StageContract,
    pub refinement: StageContract,
}

impl FieldSubflow {
    pub fn standard() -> Self {
        Self {
            construction: stages::construction(),
            review: stages::legal_review(),
            refinement: stages::final_refinement(),
        }
    }

    fn contracts(&self) -> [&StageContract; 3] {
        [&self.construction, &self.review, &self.refinement]
    }
}

/// A validated pipeline graph.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    prefix: Vec<PrefixNode>,
    subflow: FieldSubflow,
    /// Indices into `prefix`, in execution order.
    order: Vec<usize>,
}

impl PipelineGraph {
    /// Build and validate a graph. Any defect is a `ContractViolation`.
    pub fn new(prefix: Vec<PrefixNode>, subflow: FieldSubflow) -> Result<Self> {
        let mut graph = Self {
            prefix,
            subflow,
            order: Vec::new(),
        };
        graph.order = graph.validate()?;
        Ok(graph)
    }

    /// knowledge_retrieval → domain_breakdown → product_type_analysis →
    /// schema_inference, then the standard field subflow.
    pub fn standard() -> Result<Self> {
        let prefix = vec![
            PrefixNode::new(stages::knowledge_retrieval()).with_knowledge(),
            PrefixNode::new(stages::domain_breakdown()).after(stages::KNOWLEDGE_RETRIEVAL),
            PrefixNode::new(stages::product_type_analysis()).after(stages::DOMAIN_BREAKDOWN),
            PrefixNode::new(stages::schema_inference())
                .after(stages::PRODUCT_TYPE_ANALYSIS)
                .declaring_fields(),
        ];
        Self::new(prefix, FieldSubflow::standard())
    }

    /// Check dependencies, acyclicity and input coverage. Returns the
    /// topological execution order.
    pub fn validate(&self) -> Result<Vec<usize>> {
        let mut dag: DiGraph<usize, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for (i, node) in self.prefix.iter().enumerate() {
            let idx = dag.add_node(i);
            if index.insert(node.name(), idx).is_some() {
                return Err(StyleGuideError::contract(
                    node.name(),
                    "stage is declared more than once",
                ));
            }
        }

        for node in &self.prefix {
            let to = index[node.name()];
            for dep in &node.depends_on {
                let Some(&from) = index.get(dep.as_str()) else {
                    return Err(StyleGuideError::contract(
                        node.name(),
                        format!("depends on unknown stage '{dep}'"),
                    ));
                };
                dag.add_edge(from, to, ());
            }
        }

        let sorted = toposort(&dag, None).map_err(|cycle| {
            let stage = self.prefix[dag[cycle.node_id()]].name();
            StyleGuideError::contract(stage, "stage is part of a dependency cycle")
        })?;
        let order: Vec<usize> = sorted.into_iter().map(|idx| dag[idx]).collect();

        // Keys visible to each node: seeds plus outputs of transitive dependencies.
        let mut upstream: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); self.prefix.len()];
        for &i in &order {
            let node = &self.prefix[i];
            let mut visible: BTreeSet<&str> = BTreeSet::new();
            for dep in &node.depends_on {
                let d = dag[index[dep.as_str()]];
                visible.extend(upstream[d].iter().copied());
                visible.extend(self.prefix[d].contract.output_keys());
            }

            let missing: Vec<&str> = node
                .contract
                .required_inputs()
                .iter()
                .map(String::as_str)
                .filter(|k| !stages::SEED_KEYS.contains(k) && !visible.contains(k))
                .collect();
            if !missing.is_empty() {
                return Err(StyleGuideError::contract(
                    node.name(),
                    format!("no upstream stage provides: {}", missing.join(", ")),
                ));
            }
            upstream[i] = visible;
        }

        let declaring: Vec<&PrefixNode> =
            self.prefix.iter().filter(|n| n.declares_fields).collect();
        match declaring.as_slice() {
            [node] => {
                if !node.contract.output_keys().any(|k| k == keys::FIELDS) {
                    return Err(StyleGuideError::contract(
                        node.name(),
                        format!("declares fields but has no '{}' output", keys::FIELDS),
                    ));
                }
            }
            [] => {
                return Err(StyleGuideError::contract(
                    "pipeline",
                    "no stage declares the field schema",
                ));
            }
            [_, second, ..] => {
                return Err(StyleGuideError::contract(
                    second.name(),
                    "more than one stage declares the field schema",
                ));
            }
        }

        let prefix_outputs: BTreeSet<&str> = self
            .prefix
            .iter()
            .flat_map(|n| n.contract.output_keys())
            .collect();
        for contract in self.subflow.contracts() {
            let missing: Vec<&str> = contract
                .required_inputs()
                .iter()
                .map(String::as_str)
                .filter(|k| {
                    !stages::SEED_KEYS.contains(k)
                        && !stages::LOOP_KEYS.contains(k)
                        && !prefix_outputs.contains(k)
                })
                .collect();
            if !missing.is_empty() {
                return Err(StyleGuideError::contract(
                    contract.name(),
                    format!("nothing provides: {}", missing.join(", ")),
                ));
            }
        }

        Ok(order)
    }

    /// Prefix nodes in execution order.
    pub fn execution_order(&self) -> impl Iterator<Item = &PrefixNode> {
        self.order.iter().map(|&i| &self.prefix[i])
    }

    pub fn subflow(&self) -> &FieldSubflow {
        &self.subflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::OutputField;

    fn node(name: &str, requires: &[&str], produces: &[&str]) -> PrefixNode {
        let mut contract = StageContract::new(name, name).requires(requires.iter().copied());
        for p in produces {
            contract = contract.produces(OutputField::text(*p));
        }
        PrefixNode::new(contract)
    }

    fn fields_node(name: &str, requires: &[&str]) -> PrefixNode {
        PrefixNode::new(
            StageContract::new(name, name)
                .requires(requires.iter().copied())
                .produces(OutputField::list(keys::FIELDS).non_empty()),
        )
        .declaring_fields()
    }

    fn minimal_subflow() -> FieldSubflow {
        let stage = |name: &str| {
            StageContract::new(name, name)
                .requires([keys::FIELD])
                .produces(OutputField::text("out"))
        };
        FieldSubflow {
            construction: stage("c"),
            review: stage("r"),
            refinement: stage("f"),
        }
    }

    #[test]
    fn standard_graph_is_valid_and_linear() {
        let graph = PipelineGraph::standard().expect("standard graph");
        let order: Vec<_> = graph.execution_order().map(PrefixNode::name).collect();
        assert_eq!(
            order,
            [
                "knowledge_retrieval",
                "domain_breakdown",
                "product_type_analysis",
                "schema_inference"
            ]
        );
        assert!(graph.execution_order().next().unwrap().loads_knowledge);
    }

    #[test]
    fn order_follows_edges_not_declaration() {
        let graph = PipelineGraph::new(
            vec![
                fields_node("b", &["a_out"]).after("a"),
                node("a", &["category"], &["a_out"]),
            ],
            minimal_subflow(),
        )
        .unwrap();
        let order: Vec<_> = graph.execution_order().map(PrefixNode::name).collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn unknown_dependency_rejected() {
        let err = PipelineGraph::new(
            vec![fields_node("b", &[]).after("ghost")],
            minimal_subflow(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown stage 'ghost'"));
    }

    #[test]
    fn cycle_rejected() {
        let err = PipelineGraph::new(
            vec![
                node("a", &[], &["a_out"]).after("b"),
                fields_node("b", &[]).after("a"),
            ],
            minimal_subflow(),
        )
        .unwrap_err();
        assert!(matches!(err, StyleGuideError::ContractViolation { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn input_must_come_from_a_dependency() {
        // `b` needs a_out but does not depend on `a`
        let err = PipelineGraph::new(
            vec![node("a", &[], &["a_out"]), fields_node("b", &["a_out"])],
            minimal_subflow(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no upstream stage provides: a_out"));
    }

    #[test]
    fn transitive_outputs_are_visible() {
        PipelineGraph::new(
            vec![
                node("a", &[], &["a_out"]),
                node("b", &[], &["b_out"]).after("a"),
                fields_node("c", &["a_out", "b_out"]).after("b"),
            ],
            minimal_subflow(),
        )
        .expect("a_out reaches c through b");
    }

    #[test]
    fn subflow_inputs_are_checked() {
        let mut subflow = minimal_subflow();
        subflow.review = StageContract::new("r", "r").requires(["verdict_from_nowhere"]);
        let err = PipelineGraph::new(vec![fields_node("s", &[])], subflow).unwrap_err();
        assert!(err.to_string().contains("verdict_from_nowhere"));
    }

    #[test]
    fn exactly_one_stage_declares_fields() {
        let err = PipelineGraph::new(vec![node("a", &[], &["x"])], minimal_subflow()).unwrap_err();
        assert!(err.to_string().contains("no stage declares"));

        let err = PipelineGraph::new(
            vec![fields_node("a", &[]), fields_node("b", &[])],
            minimal_subflow(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }
}
