//! Whole-path translation between project and mount namespaces.

use overlay_broker::paths::{is_within, normalize, to_mount_path, to_project_path};

const PROJECT: &str = "/home/user/project";
const MOUNT: &str = "/tmp/agentfs-mounts/ses_1";

#[test]
fn normalize_collapses_segments() {
    assert_eq!(normalize("/a/./b//c/"), "/a/b/c");
    assert_eq!(normalize("/a/b/../c"), "/a/c");
    assert_eq!(normalize("a/b"), "/a/b");
}

#[test]
fn normalize_never_escapes_root() {
    assert_eq!(normalize("/../../x"), "/x");
    assert_eq!(normalize("/.."), "/");
}

#[test]
fn normalize_empty_and_root() {
    assert_eq!(normalize(""), "/");
    assert_eq!(normalize("/"), "/");
    assert_eq!(normalize("//"), "/");
}

#[test]
fn normalize_is_idempotent() {
    for p in ["", "/", "a/../b/./c/", "/x/../../y", "/a b/c.d/[e]", "./.."] {
        let once = normalize(p);
        assert_eq!(normalize(&once), once, "input {p:?}");
    }
}

#[test]
fn project_root_maps_to_mount_root() {
    assert_eq!(to_mount_path(PROJECT, PROJECT, MOUNT), MOUNT);
    assert_eq!(to_mount_path("/home/user/project/", PROJECT, MOUNT), MOUNT);
}

#[test]
fn descendants_map_under_mount() {
    assert_eq!(
        to_mount_path("/home/user/project/src/main.rs", PROJECT, MOUNT),
        "/tmp/agentfs-mounts/ses_1/src/main.rs"
    );
}

#[test]
fn sibling_with_shared_prefix_untouched() {
    assert_eq!(
        to_mount_path("/home/user/project2/x", PROJECT, MOUNT),
        "/home/user/project2/x"
    );
    assert!(!is_within("/home/user/project2/x", PROJECT));
}

#[test]
fn outside_paths_pass_through_normalized() {
    assert_eq!(to_mount_path("/etc/hosts", PROJECT, MOUNT), "/etc/hosts");
    assert_eq!(to_project_path("/etc/./hosts", PROJECT, MOUNT), "/etc/hosts");
}

#[test]
fn round_trip_inside_project() {
    for p in [
        PROJECT,
        "/home/user/project/a",
        "/home/user/project/a/b/../c.txt",
        "/home/user/project/./deep/dir/",
    ] {
        let there = to_mount_path(p, PROJECT, MOUNT);
        assert_eq!(to_project_path(&there, PROJECT, MOUNT), normalize(p));
    }
}

#[test]
fn root_operands_do_not_double_slashes() {
    assert_eq!(to_mount_path("/src/lib.rs", "/", "/mnt/s"), "/mnt/s/src/lib.rs");
    assert_eq!(to_mount_path("/", "/", "/mnt/s"), "/mnt/s");
    assert_eq!(to_project_path("/mnt/s/src", "/", "/mnt/s"), "/src");
}

#[test]
fn metacharacters_in_roots_are_literal() {
    let project = "/work/my.app[1](x)";
    let mount = "/mnt/s";
    assert_eq!(
        to_mount_path("/work/my.app[1](x)/f", project, mount),
        "/mnt/s/f"
    );
    assert_eq!(
        to_mount_path("/work/myXapp[1](x)/f", project, mount),
        "/work/myXapp[1](x)/f"
    );
}
