//! Integration tests: session.

mod common;

use common::{engine_error, ok, ready_client, test_config, ScriptedEngine, HASHED_PASSWORD_HEX};
use secrecy::SecretString;
use serde_json::{json, Map, Value};
use vaultbridge_core::session::Readiness;
use vaultbridge_core::{Command, KeyEncoding, SessionClient, VaultError};

fn echo_engine() -> ScriptedEngine {
    ScriptedEngine::new(|code, data| {
        if code == Command::ActiveVaultGet.code() {
            ok(json!({ "echo": data["key"] }))
        } else {
            ok(json!({}))
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_are_answered_in_issuance_order() {
    let engine = echo_engine();
    let client = ready_client(&engine).await;

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let mut data = Map::new();
            data.insert("key".into(), json!(format!("record/{i}")));
            tokio::spawn(client.send(Command::ActiveVaultGet, Some(data)))
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let response = handle.await.expect("join").expect("reply");
        assert_eq!(response.get_str("echo"), Some(format!("record/{i}").as_str()));
    }

    let keys: Vec<Value> = engine
        .requests()
        .into_iter()
        .filter(|request| request["command"] == Command::ActiveVaultGet.code())
        .map(|request| request["data"]["key"].clone())
        .collect();
    let expected: Vec<Value> = (0..32).map(|i| json!(format!("record/{i}"))).collect();
    assert_eq!(keys, expected);
    assert_eq!(engine.overlaps(), 0);
}

#[tokio::test]
async fn test_request_is_queued_when_issued() {
    let engine = echo_engine();
    let client = ready_client(&engine).await;

    let mut first = Map::new();
    first.insert("key".into(), json!("a"));
    let mut second = Map::new();
    second.insert("key".into(), json!("b"));

    let a = client.send(Command::ActiveVaultGet, Some(first));
    let b = client.send(Command::ActiveVaultGet, Some(second));

    // Polled in reverse; the wire still sees `a` first.
    let b = b.await.expect("b");
    let a = a.await.expect("a");
    assert_eq!(a.get_str("echo"), Some("a"));
    assert_eq!(b.get_str("echo"), Some("b"));

    let commands = engine.requests();
    assert_eq!(commands[commands.len() - 2]["data"]["key"], "a");
    assert_eq!(commands[commands.len() - 1]["data"]["key"], "b");
}

#[tokio::test]
async fn test_bootstrap_sequence() {
    let engine = echo_engine();
    let client = SessionClient::new(engine.clone(), &test_config());
    assert_eq!(client.readiness(), Readiness::Starting);

    assert!(matches!(
        client.vaults_get_status().await,
        Err(VaultError::NotInitialized)
    ));

    client.bootstrap().await.expect("bootstrap");
    assert!(client.is_ready());
    client.wait_until_ready().await.expect("ready");

    let requests = engine.requests();
    assert_eq!(requests[0]["command"], 1);
    assert_eq!(requests[0]["data"]["path"], "/tmp/vaultbridge-test");
    assert_eq!(requests[0]["source"], "vaultbridge");
    assert_eq!(requests[1]["command"], 49);
    assert_eq!(requests[1]["data"]["coreStoreOptions"]["readOnly"], true);
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_failed_bootstrap_is_reported_to_waiters() {
    let engine = ScriptedEngine::new(|_, _| ok(json!({})));
    let client = SessionClient::new(engine.clone(), &test_config());
    client.close_all_instances();

    assert!(matches!(
        client.bootstrap().await,
        Err(VaultError::TransportUnavailable)
    ));
    assert!(matches!(
        client.wait_until_ready().await,
        Err(VaultError::InitializationFailed(_))
    ));
}

#[tokio::test]
async fn test_engine_errors_are_classified() {
    let engine = ScriptedEngine::new(|code, _| {
        if code == Command::MasterVaultGetStatus.code() {
            engine_error("ELOCKED: File is locked")
        } else {
            engine_error("Vault not found")
        }
    });
    let client = ready_client(&engine).await;

    assert!(matches!(
        client.vaults_get_status().await,
        Err(VaultError::VaultLocked)
    ));
    match client.active_vault_get_status().await {
        Err(VaultError::EngineError(message)) => assert_eq!(message, "Vault not found"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_status_and_list_parsing() {
    let engine = ScriptedEngine::new(|code, _| match code {
        3 => ok(json!({ "status": true, "id": "master" })),
        12 => ok(json!({ "status": false })),
        7 => ok(json!([
            { "id": "v1", "name": "Personal", "version": 1 },
            { "id": "v2" },
            { "id": "v3", "name": "Work", "encryption": { "ciphertext": "c", "nonce": "n" } }
        ])),
        _ => ok(json!({})),
    });
    let client = ready_client(&engine).await;

    let master = client.vaults_get_status().await.expect("status");
    assert!(master.is_initialized);
    assert!(!master.is_locked);
    assert_eq!(master.id.as_deref(), Some("master"));

    let active = client.active_vault_get_status().await.expect("status");
    assert!(!active.is_initialized);
    assert!(active.is_locked);

    let vaults = client.list_vaults().await.expect("list");
    let names: Vec<&str> = vaults.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["Personal", "Work"]);
    assert_eq!(
        vaults[1].encryption.as_ref().map(|e| e.nonce.as_str()),
        Some("n")
    );

    let list_request = engine
        .requests()
        .into_iter()
        .find(|r| r["command"] == 7)
        .expect("list request");
    assert_eq!(list_request["data"]["filterKey"], "vault/");
}

#[tokio::test]
async fn test_encryption_init_lock_means_shared_instance() {
    let engine = ScriptedEngine::new(|code, _| {
        if code == Command::EncryptionInit.code() {
            engine_error("Lock hold by current process")
        } else {
            ok(json!({}))
        }
    });
    let client = ready_client(&engine).await;
    assert_eq!(
        client.encryption_init().await.expect("init"),
        vaultbridge_core::session::EncryptionInit::SharedInstance
    );
}

#[tokio::test]
async fn test_passwords_are_sent_base64() {
    let engine = ScriptedEngine::new(|code, _| {
        if code == Command::EncryptionHashPassword.code() {
            ok(json!({ "hashedPassword": "abcd" }))
        } else {
            ok(json!("derived-key"))
        }
    });
    let client = ready_client(&engine).await;

    let password = SecretString::from("hunter2".to_string());
    assert_eq!(client.hash_password(&password).await.expect("hash"), "abcd");
    assert_eq!(
        client
            .get_decryption_key("salt", &password)
            .await
            .expect("key"),
        "derived-key"
    );

    let requests = engine.requests();
    let hash_request = &requests[requests.len() - 2];
    assert_eq!(hash_request["data"]["password"], "aHVudGVyMg==");
    assert_eq!(requests[requests.len() - 1]["data"]["salt"], "salt");
}

#[tokio::test]
async fn test_job_queue_key_from_master_encryption() {
    let engine = ScriptedEngine::new(|code, data| {
        if code == Command::MasterVaultGet.code() && data["key"] == "masterEncryption" {
            ok(json!({
                "ciphertext": "c",
                "nonce": "n",
                "salt": "s",
                "hashedPassword": HASHED_PASSWORD_HEX
            }))
        } else {
            ok(json!({}))
        }
    });
    let client = ready_client(&engine).await;

    let key = client
        .job_queue_key(KeyEncoding::Hex)
        .await
        .expect("job key");
    assert_eq!(hex::encode(key.as_bytes()), HASHED_PASSWORD_HEX);

    let record = client
        .master_encryption()
        .await
        .expect("read")
        .expect("present");
    assert_eq!(record.salt, "s");
    assert!(!format!("{record:?}").contains(HASHED_PASSWORD_HEX));
}

#[tokio::test]
async fn test_missing_hashed_password_is_invalid_key() {
    let engine = ScriptedEngine::new(|_, _| ok(json!({})));
    let client = ready_client(&engine).await;
    assert!(matches!(
        client.job_queue_key(KeyEncoding::Auto).await,
        Err(VaultError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_close_all_instances_is_fire_and_forget() {
    let engine = echo_engine();
    let client = ready_client(&engine).await;

    client.close_all_instances();
    assert!(engine.is_shut_down());
    assert!(!client.is_connected());
    assert_eq!(engine.count(Command::CloseAllInstances), 1);
    assert!(matches!(
        client.vaults_get_status().await,
        Err(VaultError::TransportUnavailable)
    ));

    // Second call is a no-op.
    client.close_all_instances();
    assert_eq!(engine.count(Command::CloseAllInstances), 1);
}

#[test]
fn test_close_all_instances_without_runtime() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let engine = echo_engine();
    let client = runtime.block_on(ready_client(&engine));

    std::thread::scope(|scope| {
        scope
            .spawn(|| client.close_all_instances())
            .join()
            .expect("close outside a runtime");
    });

    assert!(engine.is_shut_down());
    assert!(!client.is_connected());
    assert_eq!(engine.count(Command::CloseAllInstances), 0);
}
