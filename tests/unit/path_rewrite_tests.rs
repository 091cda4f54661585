//! Rewriting paths embedded in free text.

use overlay_broker::paths::{rewrite_in_string, rewrite_relative_output};

const PROJECT: &str = "/home/user/project";
const MOUNT: &str = "/tmp/agentfs-mounts/ses_1";

#[test]
fn rewrites_path_inside_command() {
    assert_eq!(rewrite_in_string("cat /a/b/c.ts", "/a/b", "/x/y"), "cat /x/y/c.ts");
}

#[test]
fn identical_operands_are_noop() {
    for s in ["", "cat /a/b", "/a/b", "nothing here"] {
        assert_eq!(rewrite_in_string(s, "/a/b", "/a/b"), s);
    }
}

#[test]
fn rewrites_every_occurrence() {
    let text = "cp /a/b/x /a/b/y && ls /a/b";
    assert_eq!(
        rewrite_in_string(text, "/a/b", "/m"),
        "cp /m/x /m/y && ls /m"
    );
}

#[test]
fn boundaries_include_quotes_and_whitespace() {
    assert_eq!(rewrite_in_string("\"/a/b\"", "/a/b", "/m"), "\"/m\"");
    assert_eq!(rewrite_in_string("'/a/b' x", "/a/b", "/m"), "'/m' x");
    assert_eq!(rewrite_in_string("`/a/b`", "/a/b", "/m"), "`/m`");
    assert_eq!(rewrite_in_string("/a/b\n/a/b\t", "/a/b", "/m"), "/m\n/m\t");
}

#[test]
fn shared_prefix_sibling_is_untouched() {
    let text = "ls /home/user/project2/x /home/user/project/y";
    assert_eq!(
        rewrite_in_string(text, PROJECT, MOUNT),
        "ls /home/user/project2/x /tmp/agentfs-mounts/ses_1/y"
    );
}

#[test]
fn regex_metacharacters_are_escaped() {
    let from = "/w/a.b[c](d)";
    assert_eq!(rewrite_in_string("cd /w/a.b[c](d)/e", from, "/m"), "cd /m/e");
    assert_eq!(
        rewrite_in_string("cd /w/aXb[c](d)/e", from, "/m"),
        "cd /w/aXb[c](d)/e"
    );
}

#[test]
fn absolute_mount_paths_in_output_return_to_project() {
    let output = "/tmp/agentfs-mounts/ses_1/src/lib.rs:3: warning";
    assert_eq!(
        rewrite_relative_output(output, MOUNT, PROJECT),
        "/home/user/project/src/lib.rs:3: warning"
    );
}

#[test]
fn relative_mount_references_collapse() {
    let output = "../../agentfs-mounts/ses_1/src/a.rs\n./agentfs-mounts/ses_1/b.rs";
    assert_eq!(
        rewrite_relative_output(output, MOUNT, PROJECT),
        "./src/a.rs\n./b.rs"
    );
}

#[test]
fn other_sessions_are_not_collapsed() {
    let output = "../agentfs-mounts/ses_2/src/a.rs";
    assert_eq!(rewrite_relative_output(output, MOUNT, PROJECT), output);
}

#[test]
fn output_without_paths_is_unchanged() {
    let output = "3 files changed, 10 insertions(+)";
    assert_eq!(rewrite_relative_output(output, MOUNT, PROJECT), output);
}
