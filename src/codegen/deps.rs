//! Install directive for third-party imports
//!
//! Generated code runs in an interpreter that starts with the standard
//! library only. Any other top-level package it imports gets installed by
//! a preamble that calls the interpreter's `micropip.install` helper.

/// Module that provides the asynchronous `install` helper
pub const INSTALLER_MODULE: &str = "micropip";

/// Standard-library modules that never trigger an install, from
/// `sys.stdlib_module_names` without the private modules. Kept sorted.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "_thread", "abc", "aifc", "antigravity", "argparse", "array", "ast",
    "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii",
    "bisect", "builtins", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk",
    "cmath", "cmd", "code", "codecs", "codeop", "collections", "colorsys", "compileall",
    "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg",
    "crypt", "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal",
    "difflib", "dis", "distutils", "doctest", "email", "encodings", "ensurepip", "enum",
    "errno", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch", "fractions",
    "ftplib", "functools", "gc", "genericpath", "getopt", "getpass", "gettext", "glob",
    "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "idlelib",
    "imaplib", "imghdr", "imp", "importlib", "inspect", "io", "ipaddress", "itertools",
    "json", "keyword", "lib2to3", "linecache", "locale", "logging", "lzma", "mailbox",
    "mailcap", "marshal", "math", "mimetypes", "mmap", "modulefinder", "msilib",
    "msvcrt", "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath",
    "nturl2path", "numbers", "opcode", "operator", "optparse", "os", "ossaudiodev",
    "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform",
    "plistlib", "poplib", "posix", "posixpath", "pprint", "profile", "pstats", "pty",
    "pwd", "py_compile", "pyclbr", "pydoc", "pydoc_data", "pyexpat", "queue", "quopri",
    "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy", "sched",
    "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal", "site",
    "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3",
    "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics", "string",
    "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig",
    "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap",
    "this", "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib",
    "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo", "types",
    "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv", "warnings",
    "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref", "xdrlib", "xml",
    "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Import names whose installable package is named differently
const PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("bs4", "beautifulsoup4"),
    ("cv2", "opencv-python"),
    ("dateutil", "python-dateutil"),
    ("sklearn", "scikit-learn"),
    ("yaml", "pyyaml"),
];

/// Prepend an install directive for every non-standard top-level import.
///
/// Packages are listed once each, in first-seen order. Code without any
/// third-party import is returned unchanged.
pub fn inject_install_directive(code: &str) -> String {
    let packages = detect_packages(code);
    if packages.is_empty() {
        return code.to_string();
    }

    let names = packages
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!("import {INSTALLER_MODULE}\nawait {INSTALLER_MODULE}.install([{names}])\n\n{code}")
}

/// Installable package names for the third-party imports in `code`
pub fn detect_packages(code: &str) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();

    for module in code.lines().flat_map(imported_modules) {
        if is_stdlib(module) || module == INSTALLER_MODULE {
            continue;
        }
        let package = package_name(module);
        if !packages.iter().any(|seen| seen == package) {
            packages.push(package.to_string());
        }
    }

    packages
}

/// Top-level module names referenced by a single `import`/`from` line
fn imported_modules(line: &str) -> Vec<&str> {
    let line = line.trim();
    let line = line.split('#').next().unwrap_or_default().trim();

    if let Some(rest) = line.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|item| item.split_whitespace().next())
            .filter_map(top_level)
            .collect();
    }

    if let Some(rest) = line.strip_prefix("from ") {
        let mut words = rest.split_whitespace();
        if let (Some(module), Some("import")) = (words.next(), words.next()) {
            return top_level(module).into_iter().collect();
        }
    }

    Vec::new()
}

/// `a.b.c` -> `a`; relative imports have no installable package
fn top_level(module: &str) -> Option<&str> {
    if module.starts_with('.') {
        return None;
    }
    module
        .split('.')
        .next()
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

fn is_stdlib(module: &str) -> bool {
    STDLIB_MODULES.binary_search(&module).is_ok()
}

fn package_name(module: &str) -> &str {
    PACKAGE_ALIASES
        .iter()
        .find(|(import, _)| *import == module)
        .map(|(_, package)| *package)
        .unwrap_or(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pandas_and_sys() {
        let code = "import pandas\nimport sys\nprint(sys.version)";
        let augmented = inject_install_directive(code);
        assert_eq!(detect_packages(code), vec!["pandas"]);
        assert!(augmented.starts_with("import micropip\nawait micropip.install([\"pandas\"])\n"));
        assert!(augmented.ends_with(code));
    }

    #[test]
    fn test_stdlib_only_is_unchanged() {
        let code = "import sys\nprint(sys.argv)";
        assert_eq!(inject_install_directive(code), code);
    }

    #[test]
    fn test_first_seen_order_and_dedup() {
        let code = "import numpy as np\nfrom pandas import DataFrame\nimport numpy.linalg\nimport requests, pandas";
        assert_eq!(detect_packages(code), vec!["numpy", "pandas", "requests"]);
    }

    #[test]
    fn test_dotted_and_from_imports_use_top_level() {
        let code = "from matplotlib.pyplot import plot\nimport os.path\nfrom collections import Counter";
        assert_eq!(detect_packages(code), vec!["matplotlib"]);
    }

    #[test]
    fn test_aliases_map_to_package_names() {
        let code = "from sklearn.linear_model import LinearRegression\nfrom PIL import Image";
        assert_eq!(detect_packages(code), vec!["scikit-learn", "pillow"]);
    }

    #[test]
    fn test_relative_comments_and_prose_ignored() {
        let code = "from . import sibling\n# import pandas\nprint('import numpy')\nimportlib_thing = 1";
        assert!(detect_packages(code).is_empty());
    }

    #[test]
    fn test_indented_imports_detected() {
        let code = "def load():\n    import yaml\n    return yaml";
        assert_eq!(detect_packages(code), vec!["pyyaml"]);
    }

    #[test]
    fn test_less_common_stdlib_modules_are_not_installed() {
        let code = "import optparse, pydoc, filecmp, runpy
import curses
from resource import getrlimit
import pwd, termios, fcntl, py_compile, cProfile
import requests";
        assert_eq!(detect_packages(code), vec!["requests"]);
    }

    #[test]
    fn test_stdlib_list_is_sorted() {
        assert!(STDLIB_MODULES.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_existing_micropip_import_not_reinstalled() {
        let code = "import micropip\nimport math";
        assert_eq!(inject_install_directive(code), code);
    }
}
