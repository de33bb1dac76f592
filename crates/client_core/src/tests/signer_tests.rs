use chat_shared::domain::UserId;

use super::*;
use crate::{
    session::{AuthArtifacts, CookieSnapshot},
    test_support::ScriptedTransport,
};

fn signed_in_session() -> Session {
    Session::authenticated(
        UserId::from("100"),
        "beef".into(),
        AuthArtifacts {
            csrf_token: "tok".into(),
            revision: 7,
            logout_hash: None,
        },
        CookieSnapshot::new(),
    )
}

#[test]
fn sequence_numbers_are_one_through_n() {
    let mut signer = RequestSigner::new(signed_in_session());
    let observed: Vec<u64> = (0..50)
        .map(|_| signer.sign(Vec::<(String, String)>::new()).sequence)
        .collect();

    assert_eq!(observed, (1..=50).collect::<Vec<_>>());
    assert_eq!(signer.session().sequence(), 51);
}

#[test]
fn request_id_is_base36_of_sequence() {
    let mut signer = RequestSigner::new(signed_in_session());
    for _ in 0..35 {
        signer.sign([("k", "v")]);
    }
    let request = signer.sign([("k", "v")]);
    assert_eq!(request.sequence, 36);
    assert_eq!(request.params.get("__req").map(String::as_str), Some("10"));
}

#[test]
fn extra_params_overlay_defaults_without_touching_session() {
    let mut signer = RequestSigner::new(signed_in_session());
    let request = signer.sign([("__a", "override"), ("channel", "p_100")]);

    assert_eq!(request.params.get("__a").map(String::as_str), Some("override"));
    assert_eq!(request.params.get("channel").map(String::as_str), Some("p_100"));
    assert_eq!(request.params.get("fb_dtsg").map(String::as_str), Some("tok"));
    assert_eq!(request.params.get("seq").map(String::as_str), Some("0"));
    assert_eq!(
        signer.session().default_params().get("__a").map(String::as_str),
        Some("1")
    );
}

#[test]
fn carries_last_server_sequence() {
    let mut signer = RequestSigner::new(signed_in_session());
    signer.session_mut().record_server_seq("314".into());
    let request = signer.sign(Vec::<(&str, &str)>::new());
    assert_eq!(request.params.get("seq").map(String::as_str), Some("314"));
}

#[test]
fn base36_encoding() {
    assert_eq!(to_base36(0), "0");
    assert_eq!(to_base36(35), "z");
    assert_eq!(to_base36(36 * 36), "100");
}

#[tokio::test]
async fn helpers_sign_each_call_once() {
    let transport = ScriptedTransport::new();
    transport.respond("https://chat.test/a", "");
    transport.respond("https://chat.test/b", "");

    let mut signer = RequestSigner::new(signed_in_session());
    signer
        .get(transport.as_ref(), "https://chat.test/a", Params::new(), Duration::from_secs(1))
        .await
        .expect("get");
    signer
        .post(transport.as_ref(), "https://chat.test/b", Params::new(), Duration::from_secs(1))
        .await
        .expect("post");

    let requests = transport.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].params.get("__req").map(String::as_str), Some("1"));
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].params.get("__req").map(String::as_str), Some("2"));
}
