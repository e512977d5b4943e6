#![cfg(not(target_arch = "wasm32"))]

#[test]
fn html_root_url() {
	version_sync::assert_html_root_url_updated!("src/lib.rs");
}

#[test]
fn installation() {
	version_sync::assert_markdown_deps_updated!("README.md");
}
