//! Visualization of diagrams via [graphviz/dot][dot-lang] strings.
//!
//! Nodes are drawn as circles labeled with their variable, the terminal as a
//! box, low edges dashed and high edges solid, every edge labeled with its
//! complex weight.
//!
//! [dot-lang]: https://en.wikipedia.org/wiki/DOT_(graph_description_language)

use std::{ fs, io::{ self, Write as _ }, path::Path };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashSet;
use crate::{
    amp::AMP_ZERO,
    node::{ Edge, TERMINAL },
    qdd::Qdd,
};

fn node_id(ptr: u64) -> tabbycat::Identity { (ptr as usize).into() }

fn amp_label(c: C64) -> String { format!("{:.3}{:+.3}i", c.re, c.im) }

impl Qdd {
    /// Convert the diagram rooted at `q` to a [`tabbycat::Graph`]
    /// representing it in the [dot language][dot-lang].
    ///
    /// Rendering this object using the default formatter will result in a
    /// full dot string representation of the diagram. Zero-weight edges are
    /// omitted unless `draw_zeros` is set.
    ///
    /// [dot-lang]: https://en.wikipedia.org/wiki/DOT_(graph_description_language)
    pub fn to_graphviz(&self, q: Edge, name: &str, draw_zeros: bool)
        -> tabbycat::Graph
    {
        use tabbycat::{
            AttrList, AttrType, GraphBuilder, GraphType, Identity, StmtList,
        };
        use tabbycat::attributes::*;

        const FONT: &str = "DejaVu Sans";
        const FONTSIZE: f64 = 10.0; // pt
        const NODE_HEIGHT: f64 = 0.200; // in

        let mut statements
            = StmtList::new()
            .add_attr(
                AttrType::Node,
                AttrList::new()
                    .add_pair(fontname(FONT))
                    .add_pair(fontsize(FONTSIZE))
                    .add_pair(height(NODE_HEIGHT))
                    ,
            );

        // point-shaped anchor so the root edge weight has somewhere to hang
        statements = statements.add_node(
            Identity::quoted("root"),
            None,
            Some(AttrList::new().add_pair(shape(Shape::Point))),
        );
        statements = statements.add_edge(
            tabbycat::Edge::head_node(Identity::quoted("root"), None)
                .arrow_to_node(node_id(q.ptr()), None)
                .add_attrpair(label(amp_label(self.amp_value(q.amp())))),
        );

        let mut seen: FxHashSet<u64> = FxHashSet::default();
        let mut stack = vec![q.ptr()];
        let mut saw_terminal = q.is_terminal();
        while let Some(ptr) = stack.pop() {
            if ptr == TERMINAL || !seen.insert(ptr) { continue; }
            let node = self.node(ptr);
            statements = statements.add_node(
                node_id(ptr),
                None,
                Some(
                    AttrList::new()
                        .add_pair(label(node.var().to_string()))
                        .add_pair(shape(Shape::Circle))
                ),
            );
            for (child, dashed) in [(node.low(), true), (node.high(), false)] {
                if child.amp() == AMP_ZERO && !draw_zeros { continue; }
                saw_terminal = saw_terminal || child.is_terminal();
                statements = statements.add_edge(
                    tabbycat::Edge::head_node(node_id(ptr), None)
                        .arrow_to_node(node_id(child.ptr()), None)
                        .add_attrpair(
                            label(amp_label(self.amp_value(child.amp()))))
                        .add_attrpair(style(
                            if dashed { Style::Dashed } else { Style::Solid })),
                );
                stack.push(child.ptr());
            }
        }
        if saw_terminal {
            statements = statements.add_node(
                node_id(TERMINAL),
                None,
                Some(
                    AttrList::new()
                        .add_pair(label("T".to_string()))
                        .add_pair(shape(Shape::Box))
                ),
            );
        }

        GraphBuilder::default()
            .graph_type(GraphType::DiGraph)
            .strict(false)
            .id(Identity::quoted(name))
            .stmts(statements)
            .build()
            .expect("error building graphviz")
    }

    /// Like [`to_graphviz`][Self::to_graphviz], but render directly to a
    /// string and write it to `path`.
    pub fn save_graphviz<P>(
        &self,
        q: Edge,
        name: &str,
        path: P,
        draw_zeros: bool,
    ) -> Result<&Self, io::Error>
    where P: AsRef<Path>
    {
        let graphviz = self.to_graphviz(q, name, draw_zeros);
        fs::OpenOptions::new()
            .write(true)
            .append(false)
            .create(true)
            .truncate(true)
            .open(path)?
            .write_all(format!("{}", graphviz).as_bytes())?;
        Ok(self)
    }
}

#[cfg(test)]
mod test {
    use crate::gate::GateId;
    use super::*;

    #[test]
    fn bell_state_renders() {
        let qdd = Qdd::default();
        let q = qdd.all_zero_state(2);
        let q = qdd.apply_gate(q, GateId::H, 0);
        let q = qdd.apply_cgate(q, GateId::X, 0, 1);
        let text = format!("{}", qdd.to_graphviz(q, "bell", false));
        assert!(text.contains("digraph"));
        assert!(text.contains("dashed"));
        assert!(text.contains("T"));
    }

    #[test]
    fn terminal_only_diagram_renders() {
        let qdd = Qdd::default();
        let text = format!("{}", qdd.to_graphviz(Edge::one(), "one", true));
        assert!(text.contains("digraph"));
        assert!(text.contains("1.000"));
    }
}
