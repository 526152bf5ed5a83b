//! Deterministic assembly of fetched pages into combined documents.
//!
//! Ordering comes from a pre-order traversal of the navigation tree; any
//! fetched page the tree does not reach (an orphan) is appended afterwards
//! in discovery order, so no fetched content is ever dropped. Output is a
//! pure function of its inputs.

use html_escape::encode_text;
use log::{info, warn};
use std::collections::{HashMap, HashSet};

use crate::fetch::PageContent;
use crate::navigation::{NavNode, NavTree};
use crate::utils::url_slug;

/// The two combined output documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocs {
    pub combined_html: String,
    pub combined_markdown: String,
}

/// Compute the final page ordering.
///
/// Pre-order traversal of the tree collects each linked URL present in the
/// content map exactly once (repeated tree references de-duplicate to the
/// first). Remaining content keys follow in discovery order. When tree
/// coverage falls below `coverage_threshold` of the map, the tree is
/// considered unrepresentative of this content set and the bulk of the
/// ordering comes from discovery order instead.
#[must_use]
pub fn ordered_urls(
    content: &HashMap<String, PageContent>,
    nav: &NavTree,
    discovery_order: &[String],
    coverage_threshold: f64,
) -> Vec<String> {
    let mut ordered = Vec::with_capacity(content.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(content.len());

    nav.walk(|node| {
        if let Some(link) = &node.link
            && content.contains_key(link)
            && seen.insert(link.as_str())
        {
            ordered.push(link.clone());
        }
    });

    let covered = ordered.len();
    if !content.is_empty() {
        let coverage = covered as f64 / content.len() as f64;
        if coverage < coverage_threshold {
            warn!(
                "Navigation tree covers only {covered}/{} fetched pages \
                 (threshold {coverage_threshold}); appending the rest in discovery order",
                content.len()
            );
        }
    }

    // Orphans always follow, in discovery order, so every fetched page
    // appears exactly once regardless of tree coverage.
    for url in discovery_order {
        if content.contains_key(url) && seen.insert(url.as_str()) {
            ordered.push(url.clone());
        }
    }

    ordered
}

/// Assemble the combined HTML and Markdown documents.
#[must_use]
pub fn assemble(
    content: &HashMap<String, PageContent>,
    nav: &NavTree,
    discovery_order: &[String],
    coverage_threshold: f64,
) -> AssembledDocs {
    let ordering = ordered_urls(content, nav, discovery_order, coverage_threshold);
    info!("Assembling {} pages into combined documents", ordering.len());

    AssembledDocs {
        combined_html: render_combined_html(&ordering, content),
        combined_markdown: render_combined_markdown(&ordering, content),
    }
}

/// Anchor ids for the ordered pages, one per URL.
///
/// Slugs are derived from URL paths and distinct URLs can collide
/// (`/a/b` and `/a-b` both slug to `a-b`); a colliding slug gets an ordinal
/// suffix so section ids stay unique and sidebar links land on the right
/// section. Deterministic for a given ordering.
fn anchor_ids(ordering: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(ordering.len());
    ordering
        .iter()
        .map(|url| {
            let base = url_slug(url);
            let mut id = base.clone();
            let mut n = 1usize;
            while !used.insert(id.clone()) {
                n += 1;
                id = format!("{base}-{n}");
            }
            id
        })
        .collect()
}

fn render_combined_html(ordering: &[String], content: &HashMap<String, PageContent>) -> String {
    let mut sidebar = String::new();
    let mut sections = String::new();

    let ids = anchor_ids(ordering);
    for (url, slug) in ordering.iter().zip(&ids) {
        let Some(page) = content.get(url) else { continue };
        let title = encode_text(&page.title);

        sidebar.push_str(&format!("    <li><a href=\"#{slug}\">{title}</a></li>\n"));
        sections.push_str(&format!(
            "<section id=\"{slug}\">\n<h1>{title}</h1>\n{}\n</section>\n",
            page.body
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Combined Documentation</title>\n\
         <style>\nbody {{ display: flex; font-family: sans-serif; }}\n\
         nav.sidebar {{ width: 280px; flex-shrink: 0; overflow-y: auto; \
         position: sticky; top: 0; height: 100vh; }}\n\
         main {{ flex: 1; padding: 0 2rem; max-width: 60rem; }}\n\
         section {{ border-bottom: 1px solid #ddd; padding-bottom: 2rem; }}\n</style>\n\
         </head>\n<body>\n<nav class=\"sidebar\">\n  <ul>\n{sidebar}  </ul>\n</nav>\n\
         <main>\n{sections}</main>\n</body>\n</html>\n"
    )
}

fn render_combined_markdown(ordering: &[String], content: &HashMap<String, PageContent>) -> String {
    let mut toc = String::from("# Table of Contents\n\n");
    let mut body = String::new();

    let ids = anchor_ids(ordering);
    for (url, slug) in ordering.iter().zip(&ids) {
        let Some(page) = content.get(url) else { continue };

        toc.push_str(&format!("- [{}](#{slug})\n", page.title));

        let markdown = match &page.markdown {
            Some(md) => md.clone(),
            // Pages fetched before markdown conversion existed (or where it
            // failed) get converted at assembly time.
            None => htmd::convert(&page.body).unwrap_or_else(|_| page.body.clone()),
        };
        body.push_str(&format!(
            "\n---\n\n<a id=\"{slug}\"></a>\n\n# {}\n\n{}\n",
            page.title,
            markdown.trim()
        ));
    }

    format!("{toc}{body}")
}

/// Render the navigation tree as a nested HTML list (`nav.html`).
#[must_use]
pub fn render_nav_html(nav: &NavTree) -> String {
    fn render_nodes(nodes: &[NavNode], out: &mut String, indent: usize) {
        if nodes.is_empty() {
            return;
        }
        let pad = "  ".repeat(indent);
        out.push_str(&format!("{pad}<ul>\n"));
        for node in nodes {
            let title = encode_text(&node.title);
            match &node.link {
                Some(link) => out.push_str(&format!(
                    "{pad}  <li><a href=\"{}\">{title}</a>",
                    encode_text(link)
                )),
                None => out.push_str(&format!("{pad}  <li>{title}")),
            }
            if !node.children.is_empty() {
                out.push('\n');
                render_nodes(&node.children, out, indent + 2);
                out.push_str(&pad);
                out.push_str("  ");
            }
            out.push_str("</li>\n");
        }
        out.push_str(&format!("{pad}</ul>\n"));
    }

    let mut out = String::from("<nav>\n");
    render_nodes(&nav.items, &mut out, 1);
    out.push_str("</nav>\n");
    out
}

/// Render the navigation tree as a nested Markdown list (`nav.md`).
#[must_use]
pub fn render_nav_markdown(nav: &NavTree) -> String {
    fn render_nodes(nodes: &[NavNode], out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        for node in nodes {
            match &node.link {
                Some(link) => out.push_str(&format!("{pad}- [{}]({link})\n", node.title)),
                None => out.push_str(&format!("{pad}- {}\n", node.title)),
            }
            render_nodes(&node.children, out, depth + 1);
        }
    }

    let mut out = String::new();
    render_nodes(&nav.items, &mut out, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, title: &str) -> PageContent {
        PageContent {
            url: url.to_string(),
            title: title.to_string(),
            body: format!("<p>{title}</p>"),
            markdown: Some(title.to_string()),
            source_path: std::path::PathBuf::new(),
        }
    }

    fn node(title: &str, link: Option<&str>, children: Vec<NavNode>) -> NavNode {
        NavNode {
            title: title.to_string(),
            link: link.map(str::to_string),
            children,
        }
    }

    #[test]
    fn nav_order_wins_and_orphans_follow_discovery_order() {
        let mut content = HashMap::new();
        for url in ["https://d/x", "https://d/a", "https://d/b"] {
            content.insert(url.to_string(), page(url, url));
        }
        let nav = NavTree {
            items: vec![
                node("B", Some("https://d/b"), vec![]),
                node("A", Some("https://d/a"), vec![]),
            ],
        };
        let discovery = vec![
            "https://d/x".to_string(),
            "https://d/a".to_string(),
            "https://d/b".to_string(),
        ];

        let order = ordered_urls(&content, &nav, &discovery, 0.5);
        assert_eq!(order, vec!["https://d/b", "https://d/a", "https://d/x"]);
    }

    #[test]
    fn every_content_key_appears_exactly_once() {
        let mut content = HashMap::new();
        for i in 0..10 {
            let url = format!("https://d/p{i}");
            content.insert(url.clone(), page(&url, &format!("P{i}")));
        }
        // Tree covers only one page and repeats it.
        let nav = NavTree {
            items: vec![
                node("P3", Some("https://d/p3"), vec![]),
                node("P3 again", Some("https://d/p3"), vec![]),
            ],
        };
        let discovery: Vec<String> = (0..10).map(|i| format!("https://d/p{i}")).collect();

        let order = ordered_urls(&content, &nav, &discovery, 0.5);
        assert_eq!(order.len(), content.len());
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
        assert_eq!(order[0], "https://d/p3");
    }

    #[test]
    fn nested_tree_section_scenario() {
        let mut content = HashMap::new();
        content.insert(
            "https://d/docs/intro".to_string(),
            page("https://d/docs/intro", "Intro"),
        );
        let nav = NavTree {
            items: vec![node(
                "Guide",
                None,
                vec![node("Intro", Some("https://d/docs/intro"), vec![])],
            )],
        };
        let discovery = vec!["https://d/docs/intro".to_string()];

        let docs = assemble(&content, &nav, &discovery, 0.5);
        assert_eq!(docs.combined_html.matches("<section id=").count(), 1);
        assert!(docs.combined_html.contains("<h1>Intro</h1>"));
        assert!(docs.combined_markdown.contains("# Intro"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let mut content = HashMap::new();
        for i in 0..5 {
            let url = format!("https://d/p{i}");
            content.insert(url.clone(), page(&url, &format!("P{i}")));
        }
        let nav = NavTree {
            items: vec![node("P2", Some("https://d/p2"), vec![])],
        };
        let discovery: Vec<String> = (0..5).map(|i| format!("https://d/p{i}")).collect();

        let first = assemble(&content, &nav, &discovery, 0.5);
        let second = assemble(&content, &nav, &discovery, 0.5);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_tree_falls_back_to_discovery_order() {
        let mut content = HashMap::new();
        for url in ["https://d/1", "https://d/2"] {
            content.insert(url.to_string(), page(url, url));
        }
        let discovery = vec!["https://d/2".to_string(), "https://d/1".to_string()];

        let order = ordered_urls(&content, &NavTree::default(), &discovery, 0.5);
        assert_eq!(order, vec!["https://d/2", "https://d/1"]);
    }

    #[test]
    fn html_titles_are_escaped() {
        let mut content = HashMap::new();
        content.insert(
            "https://d/x".to_string(),
            page("https://d/x", "Generics <T> & friends"),
        );
        let discovery = vec!["https://d/x".to_string()];
        let docs = assemble(&content, &NavTree::default(), &discovery, 0.5);
        assert!(docs.combined_html.contains("Generics &lt;T&gt; &amp; friends"));
    }

    #[test]
    fn colliding_slugs_get_unique_anchor_ids() {
        // Both paths slug to "a-b".
        let mut content = HashMap::new();
        for (url, title) in [("https://d/a/b", "Nested"), ("https://d/a-b", "Dashed")] {
            content.insert(url.to_string(), page(url, title));
        }
        let discovery = vec!["https://d/a/b".to_string(), "https://d/a-b".to_string()];

        let docs = assemble(&content, &NavTree::default(), &discovery, 0.5);
        assert!(docs.combined_html.contains("<section id=\"a-b\">"));
        assert!(docs.combined_html.contains("<section id=\"a-b-2\">"));
        assert!(docs.combined_html.contains("href=\"#a-b\">Nested"));
        assert!(docs.combined_html.contains("href=\"#a-b-2\">Dashed"));
        assert!(docs.combined_markdown.contains("<a id=\"a-b-2\"></a>"));
        assert!(docs.combined_markdown.contains("[Dashed](#a-b-2)"));
    }

    #[test]
    fn nav_renderings_nest() {
        let nav = NavTree {
            items: vec![node(
                "Guide",
                None,
                vec![node("Intro", Some("https://d/docs/intro"), vec![])],
            )],
        };
        let html = render_nav_html(&nav);
        assert!(html.contains("<li>Guide"));
        assert!(html.contains("href=\"https://d/docs/intro\""));

        let md = render_nav_markdown(&nav);
        assert!(md.contains("- Guide\n  - [Intro](https://d/docs/intro)\n"));
    }
}
