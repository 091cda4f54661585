//! Whole-path translation between the project and mount namespaces.
//!
//! All functions work on `/`-separated strings rather than `Path` so that
//! paths the agent mentions are translated exactly as written, whether or not
//! they exist on this machine.

/// Coerce `path` into an absolute, slash-rooted form.
///
/// `.` segments are dropped, `..` pops one component (never above `/`),
/// repeated and trailing slashes collapse, and empty input becomes `/`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            part => stack.push(part),
        }
    }

    if stack.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// Whether `path` is `root` itself or lies beneath it.
#[must_use]
pub fn is_within(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);
    path == root || strip_root(&path, &root).is_some()
}

/// Translate a project path to the equivalent path inside the mount.
///
/// Paths outside `project_root` come back normalized but otherwise untouched.
#[must_use]
pub fn to_mount_path(path: &str, project_root: &str, mount_root: &str) -> String {
    translate(path, project_root, mount_root)
}

/// Translate a mount path back to the project namespace.
///
/// Inverse of [`to_mount_path`] for every path inside the project root.
#[must_use]
pub fn to_project_path(path: &str, project_root: &str, mount_root: &str) -> String {
    translate(path, mount_root, project_root)
}

fn translate(path: &str, from_root: &str, to_root: &str) -> String {
    let path = normalize(path);
    let from_root = normalize(from_root);
    let to_root = normalize(to_root);

    if path == from_root {
        return to_root;
    }

    match strip_root(&path, &from_root) {
        Some(rest) if to_root == "/" => format!("/{rest}"),
        Some(rest) => format!("{to_root}/{rest}"),
        None => path,
    }
}

/// Suffix of a normalized `path` below a normalized `root`, without the
/// separating slash. Requires a separator boundary so `/proj2` never matches
/// `/proj`.
fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let rest = if root == "/" {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(root)?.strip_prefix('/')?
    };
    (!rest.is_empty()).then_some(rest)
}
