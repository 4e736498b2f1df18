//! Path handling for the VFS.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

/// Splits a path into components, dropping empty segments.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Whether the path starts at the root.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Resolves `path` against `cwd` into a normalized absolute path:
/// `.` components disappear, `..` pops (stopping at the root), and
/// duplicate separators collapse.
#[must_use]
pub fn normalize(cwd: &str, path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    if !is_absolute(path) {
        stack.extend(components(cwd));
    }
    for component in components(path) {
        match component {
            "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    let mut out = String::from("/");
    for (i, component) in stack.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(component);
    }
    out
}

/// Finds the longest mount point that prefixes `path`.
///
/// `/mnt` matches `/mnt` and `/mnt/x` but not `/mntx`; `/` matches
/// everything.
pub fn longest_prefix_match<'a>(
    path: &str,
    mount_points: impl Iterator<Item = &'a str>,
) -> Option<&'a str> {
    let mut best: Option<&str> = None;
    for mp in mount_points {
        let matches = mp == "/"
            || path == mp
            || (path.starts_with(mp) && path.as_bytes().get(mp.len()) == Some(&b'/'));
        if matches && best.is_none_or(|b| mp.len() > b.len()) {
            best = Some(mp);
        }
    }
    best
}

/// Strips the mount prefix, returning the in-filesystem remainder.
#[must_use]
pub fn strip_mount_prefix<'a>(path: &'a str, mount: &str) -> &'a str {
    if mount == "/" {
        path.strip_prefix('/').unwrap_or(path)
    } else if path.len() == mount.len() {
        ""
    } else {
        &path[mount.len() + 1..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_skip_empty() {
        let parts: Vec<_> = components("//bin///ls/").collect();
        assert_eq!(parts, ["bin", "ls"]);
        assert_eq!(components("/").count(), 0);
    }

    #[test]
    fn normalize_absolute() {
        assert_eq!(normalize("/home", "/bin/ls"), "/bin/ls");
        assert_eq!(normalize("/home", "/"), "/");
    }

    #[test]
    fn normalize_relative_to_cwd() {
        assert_eq!(normalize("/home", "docs"), "/home/docs");
        assert_eq!(normalize("/", "docs"), "/docs");
    }

    #[test]
    fn normalize_dot_and_dotdot() {
        assert_eq!(normalize("/a/b", "../c"), "/a/c");
        assert_eq!(normalize("/a/b", "./."), "/a/b");
        assert_eq!(normalize("/", "../.."), "/");
    }

    #[test]
    fn mount_matching() {
        let mounts = ["/", "/mnt"];
        assert_eq!(
            longest_prefix_match("/mnt/data", mounts.iter().copied()),
            Some("/mnt")
        );
        assert_eq!(
            longest_prefix_match("/mntx", mounts.iter().copied()),
            Some("/")
        );
        assert_eq!(
            longest_prefix_match("/bin/ls", mounts.iter().copied()),
            Some("/")
        );
    }

    #[test]
    fn strip_prefix_variants() {
        assert_eq!(strip_mount_prefix("/bin/ls", "/"), "bin/ls");
        assert_eq!(strip_mount_prefix("/mnt/data", "/mnt"), "data");
        assert_eq!(strip_mount_prefix("/mnt", "/mnt"), "");
    }
}
