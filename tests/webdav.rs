//
// End-to-end tests: drive DavHandler::handle over the in-memory
// filesystem and lock store, straight through the http types.
//
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

use davserve::body::Body;
use davserve::{DavHandler, FileSystem, LockSystem};

fn handler() -> DavHandler {
    DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Mem)
        .build()
}

fn handler_with_prefix(prefix: &str) -> DavHandler {
    DavHandler::builder(FileSystem::Mem)
        .locksystem(LockSystem::Mem)
        .strip_prefix(prefix)
        .build()
}

const HOST: &str = "x.example";

fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("Host", HOST);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body.into()).unwrap()
}

async fn body_string(resp: Response<Body>) -> String {
    let mut body = resp.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.expect("body read"));
    }
    String::from_utf8(out).expect("utf-8 body")
}

fn lock_body() -> Body {
    Body::from(
        r#"<?xml version="1.0" encoding="utf-8" ?>
        <D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:exclusive/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
            <D:owner><D:href>test-client</D:href></D:owner>
        </D:lockinfo>"#,
    )
}

async fn lock(dav: &DavHandler, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
    let resp = dav.handle(request("LOCK", uri, headers, lock_body())).await;
    let status = resp.status();
    let token = resp
        .headers()
        .get("Lock-Token")
        .map(|v| v.to_str().unwrap().trim_matches(['<', '>'].as_ref()).to_string())
        .unwrap_or_default();
    (status, token)
}

#[tokio::test]
async fn put_then_get() {
    let dav = handler();

    let resp = dav.handle(request("PUT", "/file.txt", &[], "hello")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let etag = resp.headers().get("ETag").unwrap().to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let resp = dav.handle(request("GET", "/file.txt", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("ETag").unwrap().to_str().unwrap(), etag);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(body_string(resp).await, "hello");
}

#[tokio::test]
async fn etag_stable_until_modified() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "one")).await;

    let first = dav.handle(request("GET", "/f", &[], Body::empty())).await;
    let second = dav.handle(request("GET", "/f", &[], Body::empty())).await;
    let etag1 = first.headers().get("ETag").unwrap().clone();
    assert_eq!(Some(&etag1), second.headers().get("ETag"));

    let resp = dav.handle(request("PUT", "/f", &[], "other-content")).await;
    assert_ne!(Some(&etag1), resp.headers().get("ETag"));
}

#[tokio::test]
async fn get_conditional_and_missing() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "data")).await;

    let resp = dav.handle(request("GET", "/f", &[], Body::empty())).await;
    let etag = resp.headers().get("ETag").unwrap().to_str().unwrap().to_string();

    let resp = dav
        .handle(request("GET", "/f", &[("If-None-Match", &etag)], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

    let resp = dav.handle(request("GET", "/gone", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // GET on a collection is not a thing.
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    let resp = dav.handle(request("GET", "/d", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn get_range() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "0123456789")).await;

    let resp = dav
        .handle(request("GET", "/f", &[("Range", "bytes=2-5")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("Content-Range").unwrap().to_str().unwrap(),
        "bytes 2-5/10"
    );
    assert_eq!(body_string(resp).await, "2345");

    let resp = dav
        .handle(request("GET", "/f", &[("Range", "bytes=90-")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn delete_requires_existence() {
    let dav = handler();

    let resp = dav.handle(request("DELETE", "/nope", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    dav.handle(request("PUT", "/f", &[], "x")).await;
    let resp = dav.handle(request("DELETE", "/f", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = dav.handle(request("GET", "/f", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mkcol_statuses() {
    let dav = handler();

    let resp = dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Missing parent.
    let resp = dav.handle(request("MKCOL", "/x/y", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Already exists.
    let resp = dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // A request body is not defined for MKCOL.
    let resp = dav.handle(request("MKCOL", "/e", &[], "surprise")).await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn options_allow_sets() {
    let dav = handler();
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    dav.handle(request("PUT", "/f", &[], "x")).await;

    let allow = |resp: &Response<Body>| {
        resp.headers().get("Allow").unwrap().to_str().unwrap().to_string()
    };

    let resp = dav.handle(request("OPTIONS", "/d", &[], Body::empty())).await;
    assert_eq!(resp.headers().get("DAV").unwrap().to_str().unwrap(), "1, 2");
    assert_eq!(
        resp.headers().get("MS-Author-Via").unwrap().to_str().unwrap(),
        "DAV"
    );
    assert!(!allow(&resp).contains("GET"));
    assert!(allow(&resp).contains("PROPFIND"));

    let resp = dav.handle(request("OPTIONS", "/f", &[], Body::empty())).await;
    assert!(allow(&resp).contains("GET"));
    assert!(allow(&resp).contains("PUT"));

    let resp = dav.handle(request("OPTIONS", "/absent", &[], Body::empty())).await;
    assert_eq!(allow(&resp), "OPTIONS, LOCK, PUT, MKCOL");
}

#[tokio::test]
async fn unknown_method_rejected() {
    let dav = handler();
    let resp = dav.handle(request("BREW", "/", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn prefix_round_trip() {
    let dav = handler_with_prefix("/dav");

    let resp = dav.handle(request("PUT", "/dav/a/../a", &[], "x")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = dav.handle(request("PUT", "/dav/a", &[], "x")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = dav.handle(request("GET", "/dav/a", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = dav.handle(request("GET", "/other/a", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locked_put_by_another_client() {
    let dav = handler();
    dav.handle(request("MKCOL", "/a", &[], Body::empty())).await;

    let (status, token) = lock(&dav, "/a", &[("Timeout", "Infinite")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(token.starts_with("opaquelocktoken:"));

    // Client B has no If header: blocked.
    let resp = dav.handle(request("PUT", "/a/x", &[], "data")).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // Client B cites the lock: allowed.
    let if_header = format!("(<{}>)", token);
    let resp = dav
        .handle(request("PUT", "/a/x", &[("If", &if_header)], "data"))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // A bogus token fails the precondition, per RFC 4918 10.4.1.
    let resp = dav
        .handle(request("PUT", "/a/y", &[("If", "(<opaquelocktoken:bogus>)")], "data"))
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn lock_null_resource_created() {
    let dav = handler();

    let (status, token) = lock(&dav, "/new", &[("Timeout", "Second-3600")]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!token.is_empty());

    // The lock-null resource exists as an empty file now.
    let resp = dav.handle(request("GET", "/new", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "");
}

#[tokio::test]
async fn lock_response_body_echoes_owner() {
    let dav = handler();
    let resp = dav
        .handle(request("LOCK", "/f", &[("Timeout", "Second-60")], lock_body()))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "application/xml; charset=utf-8"
    );
    let body = body_string(resp).await;
    assert!(body.contains("<D:lockdiscovery>"), "{}", body);
    assert!(body.contains("<D:href>test-client</D:href>"), "{}", body);
    assert!(body.contains("<D:timeout>Second-60</D:timeout>"), "{}", body);
    assert!(body.contains("<D:lockroot><D:href>/f</D:href></D:lockroot>"), "{}", body);
}

#[tokio::test]
async fn lock_refresh() {
    let dav = handler();
    let (_, token) = lock(&dav, "/f", &[("Timeout", "Second-60")]).await;

    let if_header = format!("(<{}>)", token);
    let resp = dav
        .handle(request(
            "LOCK",
            "/f",
            &[("Timeout", "Second-7200"), ("If", &if_header)],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    assert!(body.contains("<D:timeout>Second-7200</D:timeout>"), "{}", body);

    // Refreshing an unknown token is a failed precondition.
    let resp = dav
        .handle(request(
            "LOCK",
            "/f",
            &[("If", "(<opaquelocktoken:gone>)")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn shared_locks_unsupported() {
    let dav = handler();
    let body = Body::from(
        r#"<D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:shared/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
        </D:lockinfo>"#,
    );
    let resp = dav.handle(request("LOCK", "/f", &[], body)).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn unlock_semantics() {
    let dav = handler();
    let (_, token) = lock(&dav, "/a", &[]).await;

    // Wrong token: 409 Conflict.
    let resp = dav
        .handle(request("UNLOCK", "/a", &[("Lock-Token", "<opaquelocktoken:other>")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Not a Coded-URL: 400.
    let resp = dav
        .handle(request("UNLOCK", "/a", &[("Lock-Token", "no-brackets")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let coded = format!("<{}>", token);
    let resp = dav
        .handle(request("UNLOCK", "/a", &[("Lock-Token", &coded)], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // The lock is gone; the resource is writable again without If.
    let resp = dav.handle(request("PUT", "/a", &[], "x")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn move_with_overwrite() {
    let dav = handler();
    dav.handle(request("PUT", "/src", &[], "A")).await;
    dav.handle(request("PUT", "/dst", &[], "B")).await;

    let dest = format!("http://{}/dst", HOST);
    let resp = dav
        .handle(request(
            "MOVE",
            "/src",
            &[("Destination", &dest), ("Overwrite", "T"), ("Depth", "infinity")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = dav.handle(request("GET", "/dst", &[], Body::empty())).await;
    assert_eq!(body_string(resp).await, "A");
    let resp = dav.handle(request("GET", "/src", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn move_no_overwrite_and_bad_depth() {
    let dav = handler();
    dav.handle(request("PUT", "/src", &[], "A")).await;
    dav.handle(request("PUT", "/dst", &[], "B")).await;

    let dest = format!("http://{}/dst", HOST);
    let resp = dav
        .handle(request(
            "MOVE",
            "/src",
            &[("Destination", &dest), ("Overwrite", "F")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = dav
        .handle(request(
            "MOVE",
            "/src",
            &[("Destination", &dest), ("Depth", "0")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_destination_rules() {
    let dav = handler();
    dav.handle(request("PUT", "/src", &[], "A")).await;

    // Destination on another host is a gateway error.
    let resp = dav
        .handle(request(
            "COPY",
            "/src",
            &[("Destination", "http://other.example/dst")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    // Destination equal to source is forbidden.
    let dest = format!("http://{}/src", HOST);
    let resp = dav
        .handle(request("COPY", "/src", &[("Destination", &dest)], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // No Destination at all.
    let resp = dav.handle(request("COPY", "/src", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_collection_depth_zero() {
    let dav = handler();
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    dav.handle(request("PUT", "/d/x", &[], "child")).await;

    let dest = format!("http://{}/e", HOST);
    let resp = dav
        .handle(request(
            "COPY",
            "/d",
            &[("Destination", &dest), ("Depth", "0")],
            Body::empty(),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // /e exists as an empty collection; the child was not copied.
    let resp = dav.handle(request("GET", "/e", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let resp = dav.handle(request("GET", "/e/x", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn copy_is_idempotent_with_overwrite() {
    let dav = handler();
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    dav.handle(request("PUT", "/d/x", &[], "content")).await;

    let dest = format!("http://{}/e", HOST);
    let copy = || {
        request(
            "COPY",
            "/d",
            &[("Destination", &dest), ("Overwrite", "T")],
            Body::empty(),
        )
    };
    let resp = dav.handle(copy()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = dav.handle(copy()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = dav.handle(request("GET", "/e/x", &[], Body::empty())).await;
    assert_eq!(body_string(resp).await, "content");
}

#[tokio::test]
async fn propfind_depth_one() {
    let dav = handler();
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    dav.handle(request("PUT", "/d/a", &[], "aa")).await;
    dav.handle(request("PUT", "/d/b", &[], "bb")).await;

    let body = Body::from(r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#);
    let resp = dav
        .handle(request("PROPFIND", "/d", &[("Depth", "1")], body))
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "application/xml; charset=utf-8"
    );
    let body = body_string(resp).await;

    assert_eq!(body.matches("<D:response>").count(), 3, "{}", body);
    assert!(body.contains("<D:href>/d/</D:href>"), "{}", body);
    assert!(body.contains("<D:href>/d/a</D:href>"), "{}", body);
    assert!(body.contains("<D:href>/d/b</D:href>"), "{}", body);
    assert!(body.contains("<D:displayname>"), "{}", body);
    assert!(body.contains("<D:resourcetype>"), "{}", body);
    assert!(body.contains("<D:getetag>"), "{}", body);
    assert!(body.contains("<D:collection"), "{}", body);
    assert!(body.contains("HTTP/1.1 200 OK"), "{}", body);
}

#[tokio::test]
async fn propfind_depth_zero_and_missing() {
    let dav = handler();
    dav.handle(request("MKCOL", "/d", &[], Body::empty())).await;
    dav.handle(request("PUT", "/d/a", &[], "aa")).await;

    let resp = dav
        .handle(request("PROPFIND", "/d", &[("Depth", "0")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert_eq!(body.matches("<D:response>").count(), 1, "{}", body);

    let resp = dav
        .handle(request("PROPFIND", "/nope", &[], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = dav
        .handle(request("PROPFIND", "/d", &[("Depth", "2")], Body::empty()))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn propfind_named_props() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "data")).await;

    let body = Body::from(
        r#"<D:propfind xmlns:D="DAV:"><D:prop>
            <D:getcontentlength/><D:nosuchprop/>
        </D:prop></D:propfind>"#,
    );
    let resp = dav.handle(request("PROPFIND", "/f", &[("Depth", "0")], body)).await;
    let body = body_string(resp).await;

    assert!(body.contains("<D:getcontentlength>4</D:getcontentlength>"), "{}", body);
    assert!(body.contains("HTTP/1.1 404 Not Found"), "{}", body);
    assert!(body.contains("<D:nosuchprop"), "{}", body);
}

#[tokio::test]
async fn proppatch_round_trip() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "data")).await;

    let update = Body::from(
        r#"<D:propertyupdate xmlns:D="DAV:" xmlns:z="http://z.example/">
            <D:set><D:prop><z:color>red</z:color></D:prop></D:set>
        </D:propertyupdate>"#,
    );
    let resp = dav.handle(request("PROPPATCH", "/f", &[], update)).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("HTTP/1.1 200 OK"), "{}", body);

    let find = Body::from(
        r#"<D:propfind xmlns:D="DAV:" xmlns:z="http://z.example/">
            <D:prop><z:color/></D:prop></D:propfind>"#,
    );
    let resp = dav.handle(request("PROPFIND", "/f", &[("Depth", "0")], find)).await;
    let body = body_string(resp).await;
    assert!(body.contains(">red<"), "{}", body);
    assert!(body.contains("HTTP/1.1 200 OK"), "{}", body);
}

#[tokio::test]
async fn proppatch_protected_props_are_atomic() {
    let dav = handler();
    dav.handle(request("PUT", "/f", &[], "data")).await;

    // One protected property poisons the whole update.
    let update = Body::from(
        r#"<D:propertyupdate xmlns:D="DAV:" xmlns:z="http://z.example/">
            <D:set><D:prop><D:getetag>fake</D:getetag></D:prop></D:set>
            <D:set><D:prop><z:color>red</z:color></D:prop></D:set>
        </D:propertyupdate>"#,
    );
    let resp = dav.handle(request("PROPPATCH", "/f", &[], update)).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_string(resp).await;
    assert!(body.contains("HTTP/1.1 403 Forbidden"), "{}", body);
    assert!(body.contains("HTTP/1.1 424 Failed Dependency"), "{}", body);
    assert!(body.contains("cannot-modify-protected-property"), "{}", body);

    // And nothing was persisted.
    let find = Body::from(
        r#"<D:propfind xmlns:D="DAV:" xmlns:z="http://z.example/">
            <D:prop><z:color/></D:prop></D:propfind>"#,
    );
    let resp = dav.handle(request("PROPFIND", "/f", &[("Depth", "0")], find)).await;
    let body = body_string(resp).await;
    assert!(body.contains("HTTP/1.1 404 Not Found"), "{}", body);
}

#[tokio::test]
async fn proppatch_missing_target() {
    let dav = handler();
    let update = Body::from(
        r#"<D:propertyupdate xmlns:D="DAV:" xmlns:z="http://z.example/">
            <D:set><D:prop><z:color>red</z:color></D:prop></D:set>
        </D:propertyupdate>"#,
    );
    let resp = dav.handle(request("PROPPATCH", "/nope", &[], update)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_mutations_serialize_on_temp_locks() {
    let dav = handler();
    dav.handle(request("MKCOL", "/a", &[], Body::empty())).await;

    // Take an explicit lock to stand in for "another request in flight".
    let (_, token) = lock(&dav, "/a", &[]).await;
    let resp = dav.handle(request("DELETE", "/a", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let coded = format!("<{}>", token);
    dav.handle(request("UNLOCK", "/a", &[("Lock-Token", &coded)], Body::empty()))
        .await;
    let resp = dav.handle(request("DELETE", "/a", &[], Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
