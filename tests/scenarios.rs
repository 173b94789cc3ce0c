use orgtree::config::Config;
use orgtree::server::{JsonRpcRequest, Server};
use orgtree::service::TreeService;
use orgtree::store::{FileStore, MemoryStore, TreeStore};
use orgtree::{apply, parse, serialize, Document, Layout, MutationRequest, Outcome, PathExpr, TreeError};
use serde_json::{json, Value};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn updated(outcome: Outcome) -> orgtree::Envelope {
    match outcome {
        Outcome::Updated(envelope) => envelope,
        Outcome::Extracted(text) => panic!("expected an update, got extract {text}"),
    }
}

#[test]
fn organization_lifecycle_through_the_engine() {
    init_logging();

    // A: creation strips the wrapper and lifts the name out.
    let doc = Document::from_submission(r#"<Submission><TreeName>Acme</TreeName><Dept id="eng"/></Submission>"#)
        .unwrap();
    let env = doc.to_envelope();
    assert_eq!(env.name, "Acme");
    assert_eq!(env.body, r#"<Root><Dept id="eng"/></Root>"#);

    // B: graft a team under the department.
    let env = updated(apply(&env, &MutationRequest::insert(Some("/Dept"), r#"<Team name="infra"/>"#).unwrap()).unwrap());
    assert_eq!(env.body, r#"<Root><Dept id="eng"><Team name="infra"/></Dept></Root>"#);

    // C: reports are read-only subtree extracts.
    let report = MutationRequest::extract(Some("/Dept/Team"), Layout::Compact).unwrap();
    assert_eq!(apply(&env, &report).unwrap(), Outcome::Extracted(r#"<Team name="infra"/>"#.into()));
    let missing = MutationRequest::extract(Some("/Missing"), Layout::Compact).unwrap();
    let err = apply(&env, &missing).unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("/Missing"));

    // D: prune it again.
    let env = updated(apply(&env, &MutationRequest::remove(Some("/Dept/Team")).unwrap()).unwrap());
    assert_eq!(env.body, r#"<Root><Dept id="eng"/></Root>"#);
}

#[test]
fn round_trip_law_holds_for_engine_documents() {
    let samples = [
        r#"<Root/>"#,
        r#"<Root><Dept id="eng" z="1" a="2"><Team name="infra"/><Team name="web"><Lead>Kim &amp; Lee</Lead></Team></Dept></Root>"#,
        "<Org><!-- staff --><p>text <b>bold</b> more</p><![CDATA[a < b]]></Org>",
    ];
    for sample in samples {
        let tree = parse(sample).unwrap();
        assert_eq!(parse(&serialize(&tree)).unwrap(), tree);
    }
}

#[test]
fn insert_then_remove_restores_document() {
    let original = Document::from_submission(r#"<T><Dept id="a"><Team/></Dept><Dept id="b"/></T>"#).unwrap();
    let mut doc = original.clone();
    let path = PathExpr::parse("/Dept[@id='a']").unwrap();
    let inserted = doc.insert(&path, parse(r#"<Team name="new"><Member/></Team>"#).unwrap()).unwrap();
    assert_ne!(doc, original);
    orgtree::mutation::remove(&mut doc.root, &inserted).unwrap();
    assert_eq!(doc, original);
    assert_eq!(doc.to_envelope(), original.to_envelope());
}

#[test]
fn ambiguous_sibling_path_is_reported_not_guessed() {
    let env = Document::from_submission(r#"<T><Dept id="eng"/><Dept id="ops"/></T>"#).unwrap().to_envelope();
    let err = apply(&env, &MutationRequest::remove(Some("/Dept")).unwrap()).unwrap_err();
    assert_eq!(err, TreeError::AmbiguousPath { path: "/Dept".into(), step: 1, count: 2 });

    let env = updated(apply(&env, &MutationRequest::remove(Some("/Dept[2]")).unwrap()).unwrap());
    assert_eq!(env.body, r#"<Root><Dept id="eng"/></Root>"#);
}

#[test]
fn service_persists_only_successful_mutations() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut trees = TreeService::new(FileStore::open(dir.path()).unwrap());

    let created = trees.create(r#"<Submission><TreeName>Acme</TreeName><Dept id="eng"/></Submission>"#).unwrap();
    let insert = MutationRequest::insert(Some("/Dept"), r#"<Team name="infra"/>"#).unwrap();
    trees.apply(created.id, &insert).unwrap();

    let bad = MutationRequest::insert(Some("/Nowhere"), "<Team/>").unwrap();
    assert_eq!(trees.apply(created.id, &bad).unwrap_err().kind(), "PathNotFound");

    let stored = trees.store().get(created.id).unwrap();
    assert_eq!(stored.tree_data.as_deref(), Some(r#"<Root><Dept id="eng"><Team name="infra"/></Dept></Root>"#));
    assert_eq!(trees.report(created.id, Some("/Dept/Team"), Layout::Compact).unwrap(), r#"<Team name="infra"/>"#);
}

fn rpc(server: &mut Server<MemoryStore>, id: i64, tool: &str, args: Value) -> Value {
    let req: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": tool, "arguments": args }
    }))
    .unwrap();
    let resp = server.handle_request(&req).unwrap();
    serde_json::to_value(resp).unwrap()
}

fn text(resp: &Value) -> &str {
    resp["result"]["content"][0]["text"].as_str().unwrap()
}

#[test]
fn organization_lifecycle_over_json_rpc() {
    let mut server = Server::new(MemoryStore::new(), Config::default());

    let resp = rpc(
        &mut server,
        1,
        "tree_create",
        json!({ "xml_data": r#"<Submission><TreeName>Acme</TreeName><Dept id="eng"/></Submission>"# }),
    );
    let record: Value = serde_json::from_str(text(&resp)).unwrap();
    assert_eq!(record["treeData"], r#"<Root><Dept id="eng"/></Root>"#);

    let resp = rpc(&mut server, 2, "node_add", json!({ "id": 1, "path": "/Dept", "node_xml": r#"<Team name="infra"/>"# }));
    assert_eq!(text(&resp), "added\n<Root><Dept id=\"eng\"><Team name=\"infra\"/></Dept></Root>");

    let resp = rpc(&mut server, 3, "node_report", json!({ "id": 1, "path": "/Dept/Team" }));
    assert_eq!(text(&resp), r#"<Team name="infra"/>"#);

    let resp = rpc(&mut server, 4, "node_report", json!({ "id": 1, "path": "/Missing" }));
    assert_eq!(resp["result"]["isError"], true);
    assert!(text(&resp).starts_with("PathNotFound: "));

    let resp = rpc(&mut server, 5, "node_remove", json!({ "id": 1, "path": "/Dept/Team" }));
    assert_eq!(text(&resp), "removed\n<Root><Dept id=\"eng\"/></Root>");

    let resp = rpc(&mut server, 6, "node_remove", json!({ "id": 1, "path": "" }));
    assert!(text(&resp).starts_with("InvalidOperation: "));

    let stored = server.trees().get(1).unwrap();
    assert_eq!(stored.tree_name, "Acme");
    assert_eq!(stored.tree_data.as_deref(), Some(r#"<Root><Dept id="eng"/></Root>"#));

    assert_eq!(text(&rpc(&mut server, 7, "tree_delete", json!({ "id": 1 }))), "deleted:1");
    assert!(text(&rpc(&mut server, 8, "tree_list", json!({})))
        .starts_with("NotFound: "));
}
