//! Graph command - show relationships and evaluation order without applying

use anyhow::{Context as _, Result};
use declarative::{
    Catalog, NoCoordinator, Persistence, ProgressCallback, ResourceRef, ResourceStatus,
    RunOptions, execute,
};
use std::path::Path;

use crate::catalog_file;
use crate::ui;

#[derive(Default)]
struct VisitOrder(Vec<String>);

impl ProgressCallback for VisitOrder {
    fn on_resource_start(&mut self, resource: &ResourceRef) {
        self.0.push(resource.to_string());
    }

    fn on_resource_complete(&mut self, _status: &ResourceStatus) {}
}

pub fn run(catalog_path: &Path) -> Result<()> {
    let mut catalog = catalog_file::load(catalog_path)?;

    ui::header("Relationships");
    let edges = edges(&mut catalog)?;
    if edges.is_empty() {
        ui::dim("(no relationships)");
    }
    for edge in &edges {
        println!("  {edge}");
    }

    let order = visit_order(&mut catalog)?;
    ui::section("Order");
    for (i, reference) in order.iter().enumerate() {
        ui::step(i + 1, order.len(), reference);
    }
    Ok(())
}

/// Every edge of the relationship graph as `A -> B (callback)`, sorted
pub fn edges(catalog: &mut Catalog) -> Result<Vec<String>> {
    let graph = catalog
        .relationship_graph()
        .context("Could not build the relationship graph")?;
    let mut lines: Vec<String> = graph
        .all_edges()
        .into_iter()
        .map(|(from, to, label)| {
            let arrow = format!("{} -> {}", graph.describe(from), graph.describe(to));
            if label.is_labelled() {
                format!("{arrow} ({label})")
            } else {
                arrow
            }
        })
        .collect();
    lines.sort();
    Ok(lines)
}

/// The order a run would visit resources in, found with a noop run
///
/// Resources that expand when applied are expanded, so generated
/// resources show up in the order too.
pub fn visit_order(catalog: &mut Catalog) -> Result<Vec<String>> {
    let options = RunOptions {
        noop: true,
        ignore_schedules: true,
        ..RunOptions::default()
    };
    let mut store = Persistence::in_memory();
    let mut order = VisitOrder::default();
    execute(catalog, options, &mut store, &mut NoCoordinator, &mut order)
        .context("Could not order the catalog")?;
    Ok(order.0)
}
