use crate::{
    distribution::client::{status_line, Client},
    error::*,
};
use serde::Deserialize;
use std::io::Read;
use url::Url;

/// Cap on a single tag-list response body.
///
/// A registry exceeding it aborts the listing instead of growing memory
/// without bound.
pub const MAX_RESPONSE_SIZE: u64 = 20 << 20;

#[derive(Deserialize)]
struct TagList {
    name: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Debug)]
struct Page {
    tags: Vec<String>,
    next: Option<String>,
}

/// Fetch every page of a tag listing, following `Link: ...; rel="next"`.
///
/// Tags are accumulated in server order; registries that repeat entries
/// across pages keep their duplicates. A relative next URL is resolved
/// against the page that carried it.
pub(crate) fn list_all(client: &mut Client, initial: Url) -> Result<Vec<String>> {
    let mut tags = Vec::new();
    let mut current = initial;
    loop {
        let page = fetch_page(client, &current, MAX_RESPONSE_SIZE)?;
        tags.extend(page.tags);
        match page.next {
            Some(next) => current = current.join(&next)?,
            None => break,
        }
    }
    Ok(tags)
}

fn fetch_page(client: &mut Client, url: &Url, limit: u64) -> Result<Page> {
    let req = client.get(url);
    let res = client.call(req)?;
    if res.status() != 200 {
        return Err(Error::UnexpectedStatus(status_line(&res)));
    }

    let next = next_link(&res.all("link"));

    let mut buf = Vec::new();
    res.into_reader().take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(Error::ResponseTooLarge { limit });
    }

    let body: TagList = serde_json::from_slice(&buf)?;
    if let Some(name) = &body.name {
        log::debug!("Got tags page for {}", name);
    }
    Ok(Page {
        tags: body.tags.unwrap_or_default(),
        next,
    })
}

/// First `rel="next"` target across all `Link` headers.
///
/// Each header value may carry several comma-separated link entries.
fn next_link(headers: &[&str]) -> Option<String> {
    for header in headers {
        for entry in split_entries(header) {
            let mut parts = entry.split(';');
            let target = match parts.next() {
                Some(target) => target.trim(),
                None => continue,
            };
            if !(target.starts_with('<') && target.ends_with('>')) {
                continue;
            }
            for param in parts {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("rel")
                        && value.trim().trim_matches('"') == "next"
                    {
                        return Some(target[1..target.len() - 1].to_string());
                    }
                }
            }
        }
    }
    None
}

/// Split a `Link` header on commas outside of `<...>` and quoted strings.
fn split_entries(header: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_target = false;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '<' if !quoted => in_target = true,
            '>' if !quoted => in_target = false,
            '"' if !in_target => quoted = !quoted,
            ',' if !in_target && !quoted => {
                entries.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&header[start..]);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::test_server::{Response, TestServer};
    use crate::{distribution::Anonymous, ImageReference};

    #[test]
    fn next_link_single() {
        assert_eq!(
            next_link(&[r#"</v2/busybox/tags/list?last=b>; rel="next""#]),
            Some("/v2/busybox/tags/list?last=b".to_string()),
        );
    }

    #[test]
    fn next_link_unquoted_rel() {
        assert_eq!(
            next_link(&["</v2/t?last=b>; rel=next"]),
            Some("/v2/t?last=b".to_string()),
        );
    }

    #[test]
    fn next_link_multiple_entries_per_header() {
        assert_eq!(
            next_link(&[r#"</first>; rel="prev", </second>; rel="next""#]),
            Some("/second".to_string()),
        );
    }

    #[test]
    fn next_link_across_headers() {
        assert_eq!(
            next_link(&[
                r#"</prev>; rel="prev""#,
                r#"</next-a>; rel="next""#,
                r#"</next-b>; rel="next""#,
            ]),
            Some("/next-a".to_string()),
        );
    }

    #[test]
    fn next_link_absent() {
        assert_eq!(next_link(&[]), None);
        assert_eq!(next_link(&[r#"</prev>; rel="prev""#]), None);
    }

    #[test]
    fn next_link_comma_in_target() {
        assert_eq!(
            next_link(&[r#"</v2/t?ts=a,b>; rel="next""#]),
            Some("/v2/t?ts=a,b".to_string()),
        );
    }

    fn authenticated_client(server: &TestServer) -> Client {
        let reference =
            ImageReference::parse(&format!("{}/busybox", server.host())).unwrap();
        let mut client = Client::new(reference, true);
        client.authenticate(Box::new(Anonymous), &["pull"]).unwrap();
        client
    }

    #[test]
    fn follows_pages_in_order() {
        let server = TestServer::bind();
        server.serve(|req| match req.path.as_str() {
            "/v2/" => Response::new(200),
            "/v2/busybox/tags/list" => Response::new(200)
                .header("Link", r#"</v2/busybox/tags/list?last=b>; rel="next""#)
                .body(br#"{"name":"busybox","tags":["a","b"]}"#.to_vec()),
            "/v2/busybox/tags/list?last=b" => Response::new(200)
                // Relative target, resolved against the current page.
                .header("Link", r#"<list?last=d>; rel="next""#)
                .body(br#"{"name":"busybox","tags":["b","c"]}"#.to_vec()),
            "/v2/busybox/tags/list?last=d" => {
                Response::new(200).body(br#"{"name":"busybox","tags":["d"]}"#.to_vec())
            }
            _ => Response::new(404),
        });

        let mut client = authenticated_client(&server);
        let tags = client.get_tags().unwrap();
        // Server order, duplicates preserved.
        assert_eq!(tags, ["a", "b", "b", "c", "d"]);

        let list_requests = server
            .requests()
            .iter()
            .filter(|r| r.path.contains("/tags/list"))
            .count();
        assert_eq!(list_requests, 3);
    }

    #[test]
    fn null_tags_are_empty() {
        let server = TestServer::bind();
        server.serve(|req| match req.path.as_str() {
            "/v2/" => Response::new(200),
            "/v2/busybox/tags/list" => {
                Response::new(200).body(br#"{"name":"busybox","tags":null}"#.to_vec())
            }
            _ => Response::new(404),
        });

        let mut client = authenticated_client(&server);
        assert!(client.get_tags().unwrap().is_empty());
    }

    #[test]
    fn non_200_page_is_fatal() {
        let server = TestServer::bind();
        server.serve(|req| match req.path.as_str() {
            "/v2/" => Response::new(200),
            _ => Response::new(500),
        });

        let mut client = authenticated_client(&server);
        assert!(matches!(
            client.get_tags(),
            Err(Error::UnexpectedStatus(_))
        ));
    }

    #[test]
    fn oversized_page_aborts() {
        let server = TestServer::bind();
        server.serve(|req| match req.path.as_str() {
            "/v2/" => Response::new(200),
            "/v2/busybox/tags/list" => {
                let tags: Vec<String> = (0..64).map(|i| format!("tag-{:04}", i)).collect();
                let body = serde_json::json!({ "name": "busybox", "tags": tags });
                Response::new(200).body(serde_json::to_vec(&body).unwrap())
            }
            _ => Response::new(404),
        });

        let mut client = authenticated_client(&server);
        let url = client.url("/v2/busybox/tags/list").unwrap();
        // The body is larger than this cap by construction.
        let err = fetch_page(&mut client, &url, 256).unwrap_err();
        assert!(matches!(err, Error::ResponseTooLarge { limit: 256 }));
    }
}
