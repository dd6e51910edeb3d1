// SPDX-License-Identifier: MIT OR Apache-2.0
//! Line-level lexical separator of import/export declarations (spec C3).
//!
//! [`split`] consumes a source string and produces `(imports_block,
//! remainder_block)`. It recognizes, at line granularity: `import …`,
//! `import{…`, `export * …`, and multi-line `export type|interface|enum`
//! and `export { … }` declarations via brace balancing. Everything else
//! goes to the remainder. It does not parse strings or comments — a
//! `//`-commented import, or an import embedded in a string literal, is
//! not extracted (matching the sandbox's own naive top-level scan).

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Split `source` into `(imports, remainder)`, preserving within-bucket
/// source order. Concatenating all lines of both buckets reproduces the
/// original line sequence (excluding trailing newlines — see the
/// `union_preserves_lines` property test).
#[must_use]
pub fn split(source: &str) -> (String, String) {
    let lines: Vec<&str> = source.lines().collect();
    let mut imports = Vec::with_capacity(lines.len());
    let mut remainder = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if is_single_line_import(trimmed) {
            imports.push(line);
            i += 1;
            continue;
        }

        if is_export_block_start(trimmed) {
            let start = i;
            let mut depth = brace_delta(line);
            i += 1;
            while depth > 0 && i < lines.len() {
                depth += brace_delta(lines[i]);
                i += 1;
            }
            imports.extend_from_slice(&lines[start..i]);
            continue;
        }

        remainder.push(line);
        i += 1;
    }

    (imports.join("\n"), remainder.join("\n"))
}

fn is_single_line_import(trimmed: &str) -> bool {
    trimmed.starts_with("import ")
        || trimmed.starts_with("import{")
        || trimmed.starts_with("export * ")
}

fn is_export_block_start(trimmed: &str) -> bool {
    trimmed.starts_with("export type")
        || trimmed.starts_with("export interface")
        || trimmed.starts_with("export enum")
        || trimmed.starts_with("export {")
}

/// Net change in brace depth contributed by one line (naive: does not
/// understand strings or comments, by design — see module docs).
fn brace_delta(line: &str) -> i32 {
    let opens = line.matches('{').count() as i32;
    let closes = line.matches('}').count() as i32;
    opens - closes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_import_is_extracted() {
        let src = "import foo from 'bar';\nconst x = 1;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "import foo from 'bar';");
        assert_eq!(remainder, "const x = 1;");
    }

    #[test]
    fn braced_import_is_extracted() {
        let src = "import{a,b} from 'x';\nfunction f() {}";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "import{a,b} from 'x';");
        assert_eq!(remainder, "function f() {}");
    }

    #[test]
    fn export_star_is_extracted() {
        let src = "export * from './util';\nexport const x = 1;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "export * from './util';");
        assert_eq!(remainder, "export const x = 1;");
    }

    #[test]
    fn multiline_export_interface_via_brace_balancing() {
        let src = "export interface Foo {\n  a: string;\n  b: number;\n}\nconst x: Foo = {} as Foo;";
        let (imports, remainder) = split(src);
        assert_eq!(
            imports,
            "export interface Foo {\n  a: string;\n  b: number;\n}"
        );
        assert_eq!(remainder, "const x: Foo = {} as Foo;");
    }

    #[test]
    fn multiline_export_braces_list() {
        let src = "export {\n  a,\n  b,\n} from './x';\nfunction handler() {}";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "export {\n  a,\n  b,\n} from './x';");
        assert_eq!(remainder, "function handler() {}");
    }

    #[test]
    fn single_line_export_type_alias_has_no_braces() {
        let src = "export type Id = string;\nconst a = 1;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "export type Id = string;");
        assert_eq!(remainder, "const a = 1;");
    }

    #[test]
    fn commented_import_is_not_extracted() {
        let src = "// import foo from 'bar';\nconst x = 1;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "");
        assert_eq!(remainder, src);
    }

    #[test]
    fn import_inside_string_literal_is_not_extracted() {
        let src = "const s = \"import foo from 'bar'\";\nconst x = 1;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "");
        assert_eq!(remainder, src);
    }

    #[test]
    fn empty_source_yields_empty_buckets() {
        let (imports, remainder) = split("");
        assert_eq!(imports, "");
        assert_eq!(remainder, "");
    }

    #[test]
    fn order_within_each_bucket_matches_source_order() {
        let src = "import a from 'a';\nconst one = 1;\nimport b from 'b';\nconst two = 2;";
        let (imports, remainder) = split(src);
        assert_eq!(imports, "import a from 'a';\nimport b from 'b';");
        assert_eq!(remainder, "const one = 1;\nconst two = 2;");
    }

    proptest::proptest! {
        #[test]
        fn union_preserves_lines(lines in proptest::collection::vec(
            "[a-zA-Z0-9 {}();_./'\"]{0,40}", 0..30
        )) {
            let src = lines.join("\n");
            let (imports, remainder) = split(&src);
            let mut combined: Vec<&str> = Vec::new();
            combined.extend(imports.lines());
            combined.extend(remainder.lines());
            let mut original: Vec<&str> = src.lines().collect();
            let mut combined_sorted = combined.clone();
            combined_sorted.sort_unstable();
            original.sort_unstable();
            proptest::prop_assert_eq!(combined_sorted, original);
        }
    }
}
