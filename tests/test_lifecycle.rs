//! End-to-end tool calls against fake `vagrant` and `ssh` executables.
#![cfg(unix)]

mod common;

use common::{call, resource_request, tool_request, Fixture};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use vagrant_mcp::server::McpServer;
use vagrant_mcp::vm::VmConfig;

#[tokio::test]
async fn test_create_exec_destroy() {
    let fx = Fixture::new();
    let server = fx.server();

    let created = call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path(), "cpu": 1})),
    )
    .await;
    assert_eq!(created["result"]["state"], "running", "{}", created);
    assert_eq!(created["result"]["config"]["cpu"], 1);
    assert!(fx.base.path().join("t1").join("Vagrantfile").is_file());
    assert!(fx.base.path().join("t1").join("vm.json").is_file());

    let exec = call(
        &server,
        &tool_request(2, "exec_in_vm", json!({"vm_name": "t1", "command": "echo hello"})),
    )
    .await;
    assert_eq!(exec["result"]["exit_code"], 0, "{}", exec);
    assert_eq!(exec["result"]["stdout"], "hello\n");

    let calls = fx.vagrant_calls();
    assert!(calls.iter().any(|c| c == "rsync"), "{:?}", calls);
    assert!(calls.iter().any(|c| c == "rsync-back"), "{:?}", calls);

    let status = call(&server, &tool_request(3, "sync_status", json!({"vm_name": "t1"}))).await;
    assert_eq!(status["result"]["total_syncs"], 2);

    let destroyed = call(&server, &tool_request(4, "destroy_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(destroyed["result"]["destroyed"], true, "{}", destroyed);
    assert!(!fx.base.path().join("t1").exists());

    let state = call(&server, &tool_request(5, "get_vm_status", json!({"name": "t1"}))).await;
    assert_eq!(state["result"]["state"], "not_created");
    assert_eq!(state["result"]["sync_status"], serde_json::Value::Null);

    let again = call(&server, &tool_request(6, "destroy_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(again["error"]["code"], -32000);
    assert_eq!(again["error"]["data"]["kind"], "not_found");
}

#[tokio::test]
async fn test_sync_before_requires_registration() {
    let fx = Fixture::new();
    let services = fx.services();
    let cancel = CancellationToken::new();
    services
        .vms
        .create_vm("t1", &fx.project_path(), VmConfig::new("t1", fx.project_path()), &cancel)
        .await
        .unwrap();
    services.vms.start_vm("t1", &cancel).await.unwrap();

    let server = vagrant_mcp::server::McpServer::new(services, cancel).unwrap();
    let reply = call(
        &server,
        &tool_request(1, "exec_in_vm", json!({"vm_name": "t1", "command": "touch /tmp/never", "sync_after": false})),
    )
    .await;

    let message = reply["error"]["message"].as_str().unwrap();
    assert!(message.contains("VM not registered"), "{}", message);
    assert!(fx.ssh_calls().is_empty());
}

#[tokio::test]
async fn test_host_context_is_refused() {
    let fx = Fixture::new();
    let server = fx.server();

    for vm in ["host", "HOST"] {
        let reply = call(
            &server,
            &tool_request(1, "exec_in_vm", json!({"vm_name": vm, "command": "id"})),
        )
        .await;
        assert_eq!(reply["error"]["data"]["kind"], "permission_denied");
        assert!(reply["error"]["message"].as_str().unwrap().contains("SECURITY VIOLATION"));
    }
    assert!(fx.ssh_calls().is_empty());
    assert!(fx.vagrant_calls().is_empty());
}

#[tokio::test]
async fn test_stopped_vm_rejects_commands() {
    let fx = Fixture::new();
    let server = fx.server();

    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;
    let stopped = call(&server, &tool_request(2, "stop_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(stopped["result"]["state"], "stopped");

    let reply = call(
        &server,
        &tool_request(3, "exec_in_vm", json!({"vm_name": "t1", "command": "true"})),
    )
    .await;
    assert_eq!(reply["error"]["data"]["kind"], "invalid_state");
    assert!(reply["error"]["message"].as_str().unwrap().contains("VM is not running"));
    assert!(fx.ssh_calls().is_empty());
}

#[tokio::test]
async fn test_ensure_restarts_and_registers() {
    let fx = Fixture::new();
    let server = fx.server();

    let missing = call(&server, &tool_request(1, "ensure_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(missing["error"]["data"]["kind"], "invalid_input");

    let first = call(
        &server,
        &tool_request(2, "ensure_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;
    assert_eq!(first["result"]["created"], true, "{}", first);
    assert_eq!(first["result"]["started"], true);

    call(&server, &tool_request(3, "stop_dev_vm", json!({"name": "t1"}))).await;
    let second = call(&server, &tool_request(4, "ensure_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(second["result"]["created"], false);
    assert_eq!(second["result"]["started"], true);
    assert_eq!(second["result"]["state"], "running");

    let listed = call(&server, &tool_request(5, "list_dev_vms", json!({}))).await;
    assert_eq!(listed["result"]["vms"], json!([{"name": "t1", "state": "running"}]));
}

#[tokio::test]
async fn test_file_resource() {
    let fx = Fixture::new();
    let server = fx.server();
    let guest = tempfile::tempdir().unwrap();
    std::fs::write(guest.path().join("hostname"), "t1-box\n").unwrap();
    std::fs::write(guest.path().join("other"), "x").unwrap();

    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;

    let dir = guest.path().to_string_lossy().into_owned();
    let file = call(&server, &resource_request(2, &format!("devvm://files/t1{}/hostname", dir))).await;
    assert_eq!(file["result"], "t1-box\n", "{}", file);

    let listing = call(&server, &resource_request(3, &format!("devvm://files/t1{}", dir))).await;
    let mut entries: Vec<String> = serde_json::from_value(listing["result"].clone()).unwrap();
    entries.sort();
    assert_eq!(entries, vec!["hostname", "other"]);

    let state = call(&server, &resource_request(4, "devvm://vms/t1/state")).await;
    assert_eq!(state["result"]["state"], "running");
    assert!(state["result"]["sync_status"].is_object());

    call(&server, &tool_request(5, "stop_dev_vm", json!({"name": "t1"}))).await;
    let stopped = call(&server, &resource_request(6, &format!("devvm://files/t1{}/hostname", dir))).await;
    assert!(stopped["error"]["message"].as_str().unwrap().contains("VM is not running"));
}

#[tokio::test]
async fn test_guest_files_are_byte_exact() {
    let fx = Fixture::new();
    let services = fx.services();
    let server = McpServer::new(services.clone(), CancellationToken::new()).unwrap();
    let guest = tempfile::tempdir().unwrap();
    std::fs::write(guest.path().join("crlf.txt"), b"a\r\nb").unwrap();
    std::fs::write(guest.path().join("blob.bin"), [0x00u8, 0xff, 0xfe]).unwrap();

    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;

    let dir = guest.path().to_string_lossy().into_owned();
    let text = call(&server, &resource_request(2, &format!("devvm://files/t1{}/crlf.txt", dir))).await;
    assert_eq!(text["result"], "a\r\nb", "{}", text);

    let binary = call(&server, &resource_request(3, &format!("devvm://files/t1{}/blob.bin", dir))).await;
    assert_eq!(binary["result"], json!({"encoding": "base64", "content": "AP/+"}), "{}", binary);

    let cancel = CancellationToken::new();
    for (file, expected) in [("crlf.txt", b"a\r\nb".to_vec()), ("blob.bin", vec![0x00, 0xff, 0xfe])] {
        let source = format!("{}/{}", dir, file);
        services.sync.sync_from_vm("t1", Some(source.as_str()), &cancel).await.unwrap();
        assert_eq!(std::fs::read(fx.project.path().join(file)).unwrap(), expected, "{}", file);
    }
}

#[tokio::test]
async fn test_failed_destroy_keeps_vm() {
    let fx = Fixture::new();
    let services = fx.services();
    let server = McpServer::new(services.clone(), CancellationToken::new()).unwrap();
    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;

    fx.fail("destroy");
    let reply = call(&server, &tool_request(2, "destroy_dev_vm", json!({"name": "t1"}))).await;
    assert_eq!(reply["error"]["code"], -32000, "{}", reply);
    assert!(reply["error"]["message"].as_str().unwrap().contains("forced destroy failure"));

    assert!(fx.base.path().join("t1").join("Vagrantfile").is_file());
    assert!(services.sync.is_registered("t1").await);
    let state = call(&server, &tool_request(3, "get_vm_status", json!({"name": "t1"}))).await;
    assert_eq!(state["result"]["state"], "running");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tools_serialize_vagrant() {
    let fx = Fixture::new();
    let services = fx.services();
    let server = McpServer::new(services.clone(), CancellationToken::new()).unwrap();
    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;
    std::fs::write(fx.project.path().join("main.rs"), "fn main() {}\n").unwrap();

    fx.slow();
    let cancel = CancellationToken::new();
    let start_req = tool_request(2, "start_dev_vm", json!({"name": "t1"}));
    let stop_req = tool_request(3, "stop_dev_vm", json!({"name": "t1"}));
    let (started, stopped, pushed) = tokio::join!(
        call(&server, &start_req),
        call(&server, &stop_req),
        services.sync.sync_to_vm("t1", None, &cancel),
    );
    assert!(started.get("result").is_some(), "{}", started);
    assert!(stopped.get("result").is_some(), "{}", stopped);
    pushed.unwrap();
    assert!(fx.overlaps().is_empty(), "{:?}", fx.overlaps());
}

#[tokio::test]
async fn test_configure_sync_rewrites_vagrantfile() {
    let fx = Fixture::new();
    let server = fx.server();
    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;

    let reply = call(
        &server,
        &tool_request(
            2,
            "configure_sync",
            json!({"vm_name": "t1", "sync_type": "nfs", "watch": false, "exclude_patterns": ["target"]}),
        ),
    )
    .await;
    assert_eq!(reply["result"]["vagrantfile_changed"], true, "{}", reply);
    assert_eq!(reply["result"]["config"]["method"], "nfs");
    assert_eq!(reply["result"]["config"]["watch_enabled"], false);
    assert_eq!(reply["result"]["config"]["exclude_patterns"], json!(["target"]));

    let vagrantfile = std::fs::read_to_string(fx.base.path().join("t1").join("Vagrantfile")).unwrap();
    assert!(vagrantfile.contains("nfs"));
}

#[tokio::test]
async fn test_search_code() {
    let fx = Fixture::new();
    std::fs::write(fx.project.path().join("app.py"), "def handle_request():\n    return 1\n").unwrap();
    let server = fx.server();
    call(
        &server,
        &tool_request(1, "create_dev_vm", json!({"name": "t1", "project_path": fx.project_path()})),
    )
    .await;

    let reply = call(
        &server,
        &tool_request(2, "search_code", json!({"vm_name": "t1", "query": "HANDLE_REQUEST"})),
    )
    .await;
    assert_eq!(reply["result"]["count"], 1, "{}", reply);
    assert_eq!(reply["result"]["results"][0]["line"], 1);
    assert_eq!(reply["result"]["search_type"], "semantic");
}
