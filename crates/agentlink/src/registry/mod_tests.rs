// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

fn endpoint(name: &str, url: &str) -> AgentEndpoint {
    AgentEndpoint {
        url: url.to_owned(),
        id: name.to_lowercase(),
        name: name.to_owned(),
        description: format!("{name} agent"),
        skills: vec![],
    }
}

fn catalogue() -> AgentCatalogue {
    AgentCatalogue::from_endpoints([
        endpoint("ArgoCD", "http://localhost:8001"),
        endpoint("Jira", "http://localhost:8002/"),
        endpoint("Slack", "http://slack.internal:9000"),
    ])
}

#[yare::parameterized(
    plain = { "http://a:1", "http://a:1" },
    trailing_slash = { "http://a:1/", "http://a:1" },
    many_slashes = { "http://a:1///", "http://a:1" },
    whitespace = { "  http://a:1/ \n", "http://a:1" },
    path_kept = { "http://a:1/v1/", "http://a:1/v1" },
)]
fn normalizes_urls(input: &str, expected: &str) {
    assert_eq!(normalize_url(input), expected);
}

#[test]
fn card_accepts_orchestrator_field_names() -> anyhow::Result<()> {
    let entry: AgentEndpoint = serde_json::from_value(json!({
        "agent_id": "argocd",
        "name": "ArgoCD Agent",
        "description": "Deploys things",
        "endpoint": "http://localhost:8001",
        "skills": [{ "name": "sync", "description": "Sync an app" }],
        "keywords": ["deploy"],
    }))?;
    assert_eq!(entry.id, "argocd");
    assert_eq!(entry.url, "http://localhost:8001");
    assert_eq!(entry.skills.len(), 1);
    assert_eq!(entry.skills[0].name, "sync");
    assert!(entry.skills[0].tags.is_empty());
    Ok(())
}

#[test]
fn card_id_defaults_to_name() -> anyhow::Result<()> {
    let card: AgentEndpoint = serde_json::from_value(json!({
        "name": "Jira",
        "url": "http://localhost:8002",
        "skills": [{ "id": "s1", "name": "tickets", "tags": ["jira", "jira", "issues"] }],
    }))?;
    assert_eq!(card.id, "Jira");
    assert_eq!(card.skills[0].tags.len(), 2);
    Ok(())
}

#[test]
fn orchestrator_detection() {
    let mut agent = endpoint("Intelligent Orchestrator", "http://localhost:8000");
    assert!(agent.is_orchestrator());

    agent.name = "Router".to_owned();
    agent.description = "Intelligent request Routing to specialized agents".to_owned();
    assert!(agent.is_orchestrator());

    assert!(!endpoint("Jira", "http://localhost:8002").is_orchestrator());
}

#[test]
fn catalogue_is_unique_by_normalized_url() {
    let catalogue = AgentCatalogue::from_endpoints([
        endpoint("First", "http://localhost:8001"),
        endpoint("Second", "http://localhost:8001/"),
    ]);
    assert_eq!(catalogue.len(), 1);
    assert_eq!(catalogue.iter().next().map(|a| a.name.as_str()), Some("Second"));
}

#[test]
fn with_added_rejects_known_url() -> anyhow::Result<()> {
    let catalogue = catalogue();
    assert!(catalogue.with_added(endpoint("Dup", "http://localhost:8002")).is_none());

    let grown = catalogue
        .with_added(endpoint("Github", "http://localhost:8003"))
        .ok_or_else(|| anyhow::anyhow!("expected new catalogue"))?;
    assert_eq!(grown.len(), catalogue.len() + 1);
    assert_eq!(catalogue.len(), 3);
    assert_eq!(grown.iter().last().map(|a| a.name.as_str()), Some("Github"));
    Ok(())
}

#[test]
fn without_removes_exactly_one() -> anyhow::Result<()> {
    let catalogue = catalogue();
    assert!(catalogue.without("http://localhost:9999").is_none());

    let shrunk = catalogue
        .without("http://localhost:8002")
        .ok_or_else(|| anyhow::anyhow!("expected new catalogue"))?;
    assert_eq!(shrunk.len(), 2);
    assert!(!shrunk.contains_url("http://localhost:8002/"));
    let names: Vec<_> = shrunk.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["ArgoCD", "Slack"]);
    Ok(())
}

#[yare::parameterized(
    by_id = { "jira", Some("Jira") },
    by_url = { "http://localhost:8001/", Some("ArgoCD") },
    by_name_any_case = { "sLaCk", Some("Slack") },
    by_fragment = { "slack.internal", Some("Slack") },
    ambiguous_fragment = { "localhost", None },
    unknown = { "github", None },
    empty = { "  ", None },
)]
fn find_resolves_identifiers(identifier: &str, expected: Option<&str>) {
    let catalogue = catalogue();
    assert_eq!(catalogue.find(identifier).map(|a| a.name.as_str()), expected);
}

#[yare::parameterized(
    http = { "http://localhost:8000", true },
    https = { " https://agents.example.com", true },
    name = { "ArgoCD", false },
    host_port = { "localhost:8000", false },
)]
fn detects_urls(identifier: &str, expected: bool) {
    assert_eq!(is_url(identifier), expected);
}
