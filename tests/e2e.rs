//! End-to-end tests for pawk
//!
//! These run complete AWK programs through the public compile/run API and
//! check the produced output, exit status, or failure.

use std::io::{BufReader, Cursor};

use pawk::{Interpreter, NativeParam, NativeRegistry, NativeValue};

/// Run an AWK program with the given stdin and return its output
fn run_awk(program: &str, input: &str) -> Result<String, String> {
    run_awk_args(program, input, &[])
}

/// Run an AWK program with ARGV operands (files, `-`, or assignments)
fn run_awk_args(program: &str, input: &str, operands: &[&str]) -> Result<String, String> {
    let program = pawk::compile(program).map_err(|e| e.to_string())?;

    let mut interpreter = Interpreter::new(&program);
    let mut argv = vec!["pawk".to_string()];
    argv.extend(operands.iter().map(|s| s.to_string()));
    interpreter.set_args(argv);

    let mut output = Vec::new();
    interpreter
        .run(BufReader::new(Cursor::new(input.to_string())), &mut output)
        .map_err(|e| e.to_string())?;

    String::from_utf8(output).map_err(|e| e.to_string())
}

/// Run a program and return its exit status
fn run_awk_status(program: &str, input: &str) -> i32 {
    let program = pawk::compile(program).unwrap();
    let mut interpreter = Interpreter::new(&program);
    let mut output = Vec::new();
    interpreter
        .run(BufReader::new(Cursor::new(input.to_string())), &mut output)
        .unwrap()
}

// ============================================================================
// Basic Output Tests
// ============================================================================

#[test]
fn test_hello_world() {
    let output = run_awk(r#"BEGIN { print "Hello, World!" }"#, "").unwrap();
    assert_eq!(output, "Hello, World!\n");
}

#[test]
fn test_print_number() {
    let output = run_awk("BEGIN { print 42 }", "").unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_print_float() {
    let output = run_awk("BEGIN { print 3.14159 }", "").unwrap();
    assert_eq!(output, "3.14159\n");
}

#[test]
fn test_print_multiple_values_joined_with_ofs() {
    let output = run_awk(r#"BEGIN { print "a", "b", "c" }"#, "").unwrap();
    assert_eq!(output, "a b c\n");
}

#[test]
fn test_print_concatenation() {
    let output = run_awk(r#"BEGIN { print "hello" "world" }"#, "").unwrap();
    assert_eq!(output, "helloworld\n");
}

#[test]
fn test_print_respects_ors() {
    let output = run_awk(r#"BEGIN { ORS = "|" } { print $1 }"#, "a\nb\n").unwrap();
    assert_eq!(output, "a|b|");
}

#[test]
fn test_print_numeric_uses_ofmt() {
    let output = run_awk(r#"BEGIN { OFMT = "%.2f"; print 3.14159 }"#, "").unwrap();
    assert_eq!(output, "3.14\n");
}

#[test]
fn test_concat_uses_convfmt() {
    let output = run_awk(r#"BEGIN { CONVFMT = "%.2f"; x = 3.14159 ""; print x }"#, "").unwrap();
    assert_eq!(output, "3.14\n");
}

#[test]
fn test_integral_numbers_print_without_fraction() {
    let output = run_awk("BEGIN { print 2.0, 1e6, -3.0 }", "").unwrap();
    assert_eq!(output, "2 1000000 -3\n");
}

// ============================================================================
// Field Tests
// ============================================================================

#[test]
fn test_print_record() {
    let output = run_awk("{ print $0 }", "hello world").unwrap();
    assert_eq!(output, "hello world\n");
}

#[test]
fn test_print_first_field() {
    let output = run_awk("{ print $1 }", "one two three").unwrap();
    assert_eq!(output, "one\n");
}

#[test]
fn test_print_nf() {
    let output = run_awk("{ print NF }", "one two three four").unwrap();
    assert_eq!(output, "4\n");
}

#[test]
fn test_dollar_nf_is_last_field() {
    let output = run_awk("{ print $NF }", "a b c").unwrap();
    assert_eq!(output, "c\n");
}

#[test]
fn test_read_past_nf_is_empty_and_does_not_grow() {
    let output = run_awk("{ print \"[\" $7 \"]\"; print NF }", "a b").unwrap();
    assert_eq!(output, "[]\n2\n");
}

#[test]
fn test_assign_past_nf_grows_with_empty_fields() {
    let output = run_awk(r#"{ $(NF+2) = "x"; print NF; print $0 }"#, "a b").unwrap();
    assert_eq!(output, "4\na b  x\n");
}

#[test]
fn test_assign_field_rebuilds_record() {
    let output = run_awk(r#"{ $2 = "X"; print }"#, "a b c").unwrap();
    assert_eq!(output, "a X c\n");
}

#[test]
fn test_nf_zero_clears_record() {
    let output = run_awk(r#"{ NF = 0; print "[" $0 "]" }"#, "a b c").unwrap();
    assert_eq!(output, "[]\n");
}

#[test]
fn test_nf_truncates_and_extends() {
    let output = run_awk("{ NF = 2; print; NF = 4; print }", "a b c").unwrap();
    assert_eq!(output, "a b\na b  \n");
}

#[test]
fn test_assign_record_resplits() {
    let output = run_awk(r#"{ $0 = "p q r"; print NF, $3 }"#, "a").unwrap();
    assert_eq!(output, "3 r\n");
}

#[test]
fn test_fs_single_character() {
    let output = run_awk(r#"BEGIN { FS = ":" } { print $2 }"#, "a:b:c").unwrap();
    assert_eq!(output, "b\n");
}

#[test]
fn test_fs_regex() {
    let output = run_awk(r#"BEGIN { FS = "[,;]+" } { print $2 }"#, "a,;b;c").unwrap();
    assert_eq!(output, "b\n");
}

#[test]
fn test_field_reassignment_rejoins_with_ofs() {
    // BEGIN{FS=","; OFS=":"}{$1=$1; print} on x,y,z -> x:y:z
    let output = run_awk(r#"BEGIN { FS = ","; OFS = ":" } { $1 = $1; print }"#, "x,y,z\n").unwrap();
    assert_eq!(output, "x:y:z\n");
}

#[test]
fn test_join_invariant_after_field_write() {
    let program = r#"{
        $2 = "Q"
        joined = $1
        for (i = 2; i <= NF; i++) joined = joined OFS $i
        print (joined == $0)
    }"#;
    let output = run_awk(program, "a b c d\n").unwrap();
    assert_eq!(output, "1\n");
}

// ============================================================================
// Record Separator Tests
// ============================================================================

#[test]
fn test_custom_rs() {
    let output = run_awk(r#"BEGIN { RS = ";" } { print NR, $0 }"#, "a;b;c").unwrap();
    assert_eq!(output, "1 a\n2 b\n3 c\n");
}

#[test]
fn test_paragraph_mode() {
    let input = "\na b\nc d\n\n\ne f\n";
    let output = run_awk(r#"BEGIN { RS = "" } { print NR ":" NF }"#, input).unwrap();
    assert_eq!(output, "1:4\n2:2\n");
}

#[test]
fn test_paragraph_mode_newline_is_field_separator() {
    let input = "a:b\nc:d\n\nx\n";
    let output = run_awk(
        r#"BEGIN { RS = ""; FS = ":" } NR == 1 { print NF, $3 }"#,
        input,
    )
    .unwrap();
    assert_eq!(output, "4 c\n");
}

// ============================================================================
// Pattern Tests
// ============================================================================

#[test]
fn test_regex_pattern() {
    let output = run_awk("/two/ { print }", "one\ntwo\nthree").unwrap();
    assert_eq!(output, "two\n");
}

#[test]
fn test_expression_pattern() {
    let output = run_awk("NR % 2 == 1", "a\nb\nc\nd").unwrap();
    assert_eq!(output, "a\nc\n");
}

#[test]
fn test_pattern_without_action_prints() {
    let output = run_awk("$1 > 2", "1\n3\n2\n5").unwrap();
    assert_eq!(output, "3\n5\n");
}

#[test]
fn test_range_pattern() {
    let output = run_awk("/start/,/stop/ { print }", "a\nstart\nb\nstop\nc").unwrap();
    assert_eq!(output, "start\nb\nstop\n");
}

#[test]
fn test_range_pattern_reopens() {
    let output = run_awk("/on/,/off/", "on\noff\nx\non\noff").unwrap();
    assert_eq!(output, "on\noff\non\noff\n");
}

#[test]
fn test_nr_and_first_field_per_record() {
    let output = run_awk("{print NR, $1}", "a b\nc d\n").unwrap();
    assert_eq!(output, "1 a\n2 c\n");
}

#[test]
fn test_bare_regex_in_condition_matches_record() {
    let output = run_awk("{ if (/b/) print \"yes\"; else print \"no\" }", "abc\nxyz").unwrap();
    assert_eq!(output, "yes\nno\n");
}

// ============================================================================
// Operator Tests
// ============================================================================

#[test]
fn test_arithmetic_precedence() {
    let output = run_awk("BEGIN { print 2 + 3 * 4 }", "").unwrap();
    assert_eq!(output, "14\n");
}

#[test]
fn test_power_right_associative() {
    let output = run_awk("BEGIN { print 2 ^ 3 ^ 2 }", "").unwrap();
    assert_eq!(output, "512\n");
}

#[test]
fn test_unary_minus_with_power() {
    let output = run_awk("BEGIN { print -2^2 }", "").unwrap();
    assert_eq!(output, "-4\n");
}

#[test]
fn test_modulo() {
    let output = run_awk("BEGIN { print 7 % 3, -7 % 3 }", "").unwrap();
    assert_eq!(output, "1 -1\n");
}

#[test]
fn test_division_by_zero_is_fatal() {
    assert!(run_awk("BEGIN { print 1 / 0 }", "").is_err());
    assert!(run_awk("BEGIN { print 1 % 0 }", "").is_err());
    assert!(run_awk("BEGIN { x = 5; x /= 0 }", "").is_err());
}

#[test]
fn test_comparison_operators() {
    let output = run_awk(
        "BEGIN { print (1 < 2), (2 <= 2), (3 > 1), (1 >= 2), (1 == 1), (1 != 1) }",
        "",
    )
    .unwrap();
    assert_eq!(output, "1 1 1 0 1 0\n");
}

#[test]
fn test_numeric_string_comparison() {
    // Input fields that look numeric compare numerically: 10 > 9
    let output = run_awk("$1 > $2 { print \"bigger\" }", "10 9").unwrap();
    assert_eq!(output, "bigger\n");
}

#[test]
fn test_string_comparison_is_lexicographic() {
    // Authored strings compare as strings even if they look numeric
    let output = run_awk(r#"BEGIN { if ("10" < "9") print "lex" }"#, "").unwrap();
    assert_eq!(output, "lex\n");
}

#[test]
fn test_uninitialized_compares_both_ways() {
    let output = run_awk(r#"BEGIN { if (x == 0 && x == "") print "both" }"#, "").unwrap();
    assert_eq!(output, "both\n");
}

#[test]
fn test_short_circuit() {
    let program = r#"
        function boom() { n++; return 1 }
        BEGIN { 0 && boom(); 1 || boom(); print n + 0 }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "0\n");
}

#[test]
fn test_ternary() {
    let output = run_awk(r#"BEGIN { x = 5; print x > 3 ? "big" : "small" }"#, "").unwrap();
    assert_eq!(output, "big\n");
}

#[test]
fn test_increment_decrement() {
    let output = run_awk("BEGIN { x = 5; print x++, x, ++x, x--, --x }", "").unwrap();
    assert_eq!(output, "5 6 7 7 5\n");
}

#[test]
fn test_compound_assignment() {
    let output = run_awk(
        "BEGIN { x = 10; x += 2; x -= 1; x *= 3; x /= 11; x ^= 2; print x }",
        "",
    )
    .unwrap();
    assert_eq!(output, "9\n");
}

#[test]
fn test_match_operators() {
    let output = run_awk(r#"BEGIN { print ("abc" ~ /b/), ("abc" !~ /z/) }"#, "").unwrap();
    assert_eq!(output, "1 1\n");
}

#[test]
fn test_dynamic_regex_from_string() {
    let output = run_awk(r#"{ pat = "^a"; if ($0 ~ pat) print }"#, "apple\nbanana").unwrap();
    assert_eq!(output, "apple\n");
}

// ============================================================================
// Array Tests
// ============================================================================

#[test]
fn test_array_basics() {
    let output = run_awk(r#"BEGIN { a["k"] = "v"; print a["k"] }"#, "").unwrap();
    assert_eq!(output, "v\n");
}

#[test]
fn test_in_does_not_create() {
    let output = run_awk(
        r#"BEGIN { if ("k" in a) print "yes"; print length(a) }"#,
        "",
    )
    .unwrap();
    assert_eq!(output, "0\n");
}

#[test]
fn test_mention_creates_entry() {
    let output = run_awk(r#"BEGIN { x = a["k"]; print ("k" in a), length(a) }"#, "").unwrap();
    assert_eq!(output, "1 1\n");
}

#[test]
fn test_multi_dimensional_subscripts() {
    let program = r#"BEGIN {
        a[1, 2] = "x"
        if ((1, 2) in a) print "in"
        k = 1 SUBSEP 2
        print a[k]
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "in\nx\n");
}

#[test]
fn test_delete_element_and_whole_array() {
    let program = r#"BEGIN {
        a[1] = "x"; a[2] = "y"
        delete a[1]
        print length(a), (1 in a)
        delete a
        print length(a)
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "1 0\n0\n");
}

#[test]
fn test_for_in_visits_all_keys() {
    let program = r#"BEGIN {
        a["x"] = 1; a["y"] = 2; a["z"] = 3
        for (k in a) sum += a[k]
        print sum
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "6\n");
}

#[test]
fn test_array_length_tracks_cardinality() {
    let output = run_awk(
        r#"BEGIN { a[1] = 1; a[2] = 2; a[1] = 9; print length(a) }"#,
        "",
    )
    .unwrap();
    assert_eq!(output, "2\n");
}

#[test]
fn test_scalar_as_array_is_fatal() {
    // Caught at resolve time when visible statically
    assert!(run_awk("BEGIN { x = 1; x[1] = 2 }", "").is_err());
    // And at runtime when it only shows up dynamically
    let program = "function f(a) { a[1] = 2 } BEGIN { s = 1; f(s) }";
    assert!(run_awk(program, "").is_err());
}

// ============================================================================
// Control Flow Tests
// ============================================================================

#[test]
fn test_if_else_chain() {
    let program = r#"{ if ($1 > 5) print "big"; else if ($1 > 2) print "mid"; else print "small" }"#;
    let output = run_awk(program, "7\n3\n1").unwrap();
    assert_eq!(output, "big\nmid\nsmall\n");
}

#[test]
fn test_do_while() {
    let output = run_awk("BEGIN { i = 3; do { print i; i-- } while (i > 0) }", "").unwrap();
    assert_eq!(output, "3\n2\n1\n");
}

#[test]
fn test_for_loop() {
    let output = run_awk("BEGIN { for (i = 1; i <= 3; i++) print i }", "").unwrap();
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn test_for_loop_empty_condition() {
    let output = run_awk("BEGIN { for (i = 1;; i++) { if (i > 2) break; print i } }", "").unwrap();
    assert_eq!(output, "1\n2\n");
}

#[test]
fn test_break_continue() {
    let program = r#"BEGIN {
        for (i = 1; i <= 5; i++) {
            if (i == 2) continue
            if (i == 4) break
            print i
        }
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "1\n3\n");
}

#[test]
fn test_next_skips_remaining_rules() {
    let program = r#"/skip/ { next } { print "kept:" $0 }"#;
    let output = run_awk(program, "a\nskip me\nb").unwrap();
    assert_eq!(output, "kept:a\nkept:b\n");
}

#[test]
fn test_next_from_function_in_rule() {
    let program = r#"
        function maybe_next() { if ($1 == "skip") next }
        { maybe_next(); print "kept:" $1 }
    "#;
    let output = run_awk(program, "a\nskip\nb").unwrap();
    assert_eq!(output, "kept:a\nkept:b\n");
}

#[test]
fn test_exit_status() {
    assert_eq!(run_awk_status("BEGIN { exit 3 }", ""), 3);
    assert_eq!(run_awk_status("BEGIN { exit }", ""), 0);
    assert_eq!(run_awk_status("BEGIN { print 1 }", ""), 0);
}

#[test]
fn test_exit_runs_end_and_end_can_change_status() {
    let program = r#"BEGIN { exit 3 } END { print "end"; exit 7 }"#;
    let compiled = pawk::compile(program).unwrap();
    let mut interpreter = Interpreter::new(&compiled);
    let mut output = Vec::new();
    let status = interpreter
        .run(BufReader::new(Cursor::new(String::new())), &mut output)
        .unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "end\n");
    assert_eq!(status, 7);
}

#[test]
fn test_exit_in_main_loop_stops_reading() {
    let output = run_awk(r#"{ print; if (NR == 2) exit } END { print "done" }"#, "a\nb\nc").unwrap();
    assert_eq!(output, "a\nb\ndone\n");
}

// ============================================================================
// Function Tests
// ============================================================================

#[test]
fn test_function_call() {
    let program = "function add(a, b) { return a + b } BEGIN { print add(2, 3) }";
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "5\n");
}

#[test]
fn test_recursion() {
    let program = r#"
        function fact(n) {
            if (n <= 1) return 1
            return n * fact(n - 1)
        }
        BEGIN { print fact(6) }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "720\n");
}

#[test]
fn test_uninitialized_arg_becomes_callers_array() {
    let program = r#"function f(a){a[1]="x"} BEGIN{f(b); print b[1]}"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "x\n");
}

#[test]
fn test_array_passed_by_reference() {
    let program = r#"
        function fill(arr, n,   i) {
            for (i = 1; i <= n; i++) arr[i] = i * i
        }
        BEGIN { fill(sq, 3); print sq[1], sq[2], sq[3] }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "1 4 9\n");
}

#[test]
fn test_missing_params_are_uninitialized() {
    let program = r#"function f(a, b) { return "[" b "]" } BEGIN { print f(1) }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "[]\n");
}

#[test]
fn test_params_shadow_globals() {
    let program = r#"
        function f(x) { x = 99; return x }
        BEGIN { x = 1; f(5); print x }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "1\n");
}

#[test]
fn test_scalar_args_pass_by_value() {
    let program = r#"
        function bump(n) { n = n + 1; return n }
        BEGIN { v = 10; bump(v); print v }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "10\n");
}

#[test]
fn test_return_without_value() {
    let program = r#"function f() { return } BEGIN { print "[" f() "]" }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "[]\n");
}

#[test]
fn test_extra_args_evaluated_then_discarded() {
    let program = r#"
        function f(a) { return a }
        BEGIN { f(1, n++); f(1, n++); print n }
    "#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "2\n");
}

// ============================================================================
// Builtin Function Tests
// ============================================================================

#[test]
fn test_length_forms() {
    let output = run_awk(
        r#"{ print length, length($1), length("héllo") }"#,
        "hello world",
    )
    .unwrap();
    assert_eq!(output, "11 5 5\n");
}

#[test]
fn test_length_of_array() {
    let output = run_awk(r#"BEGIN { a[1]; a[2]; a[3]; print length(a) }"#, "").unwrap();
    assert_eq!(output, "3\n");
}

#[test]
fn test_index_is_one_based_code_points() {
    let output = run_awk(
        r#"BEGIN { print index("hello", "llo"), index("hello", "z"), index("héllo", "llo") }"#,
        "",
    )
    .unwrap();
    assert_eq!(output, "3 0 3\n");
}

#[test]
fn test_substr_boundaries() {
    let program = r#"BEGIN {
        print substr("abc", 0, 2)
        print substr("abc", 2)
        print "[" substr("abc", 5) "]"
        print substr("abc", 2, 100)
        print "[" substr("abc", 2, -1) "]"
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "ab\nbc\n[]\nbc\n[]\n");
}

#[test]
fn test_split_then_iterate_entries() {
    let program = r#"{n=split($0,a,":"); for(i=1;i<=n;i++) print i, a[i]}"#;
    let output = run_awk(program, "u:v:w\n").unwrap();
    assert_eq!(output, "1 u\n2 v\n3 w\n");
}

#[test]
fn test_split_returns_count_and_replaces_array() {
    let program = r#"BEGIN {
        a["old"] = 1
        n = split("x y z", a)
        print n, length(a), a[3], ("old" in a)
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "3 3 z 0\n");
}

#[test]
fn test_split_with_regex_separator() {
    let output = run_awk(r#"BEGIN { n = split("a1b22c", a, /[0-9]+/); print n, a[2] }"#, "").unwrap();
    assert_eq!(output, "3 b\n");
}

#[test]
fn test_split_empty_string() {
    let output = run_awk(r#"BEGIN { print split("", a, ":"), length(a) }"#, "").unwrap();
    assert_eq!(output, "0 0\n");
}

#[test]
fn test_split_entries_are_numeric_strings() {
    let output = run_awk(r#"BEGIN { split("10 9", a); if (a[1] > a[2]) print "numeric" }"#, "").unwrap();
    assert_eq!(output, "numeric\n");
}

#[test]
fn test_match_sets_rstart_rlength() {
    let program = r#"BEGIN {
        print match("foobar", /o+/), RSTART, RLENGTH
        print match("foobar", /z/), RSTART, RLENGTH
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "2 2 2\n0 0 -1\n");
}

#[test]
fn test_gsub_collapses_runs() {
    let output = run_awk(r#"{gsub(/a+/,"A"); print}"#, "aaabcaa\n").unwrap();
    assert_eq!(output, "AbcA\n");
}

#[test]
fn test_sub_replaces_first_only() {
    let output = run_awk(r#"{ n = sub(/o/, "0"); print n, $0 }"#, "foo boo").unwrap();
    assert_eq!(output, "1 f0o boo\n");
}

#[test]
fn test_sub_on_variable_target() {
    let output = run_awk(
        r#"BEGIN { s = "aaa"; n = gsub(/a/, "b", s); print n, s }"#,
        "",
    )
    .unwrap();
    assert_eq!(output, "3 bbb\n");
}

#[test]
fn test_gsub_ampersand_and_escapes() {
    let program = r#"BEGIN {
        s = "cat"; gsub(/a/, "[&]", s); print s
        t = "cat"; gsub(/a/, "[\&]", t); print t
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "c[a]t\nc[&]t\n");
}

#[test]
fn test_gsub_zero_matches_preserves_field_typing() {
    // When nothing matched, $0 is untouched and keeps its numeric-string
    // fields, so the comparison stays numeric
    let program = r#"{ gsub(/zzz/, "x"); if ($1 > 9) print "numeric" }"#;
    let output = run_awk(program, "10").unwrap();
    assert_eq!(output, "numeric\n");
}

#[test]
fn test_sprintf_round_trips() {
    let program = r#"BEGIN {
        print sprintf("%s", "abc")
        print sprintf("%d", 42)
        print sprintf("%05.1f|%-6s|%x", 3.14159, "ab", 255)
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "abc\n42\n003.1|ab    |ff\n");
}

#[test]
fn test_case_mapping() {
    let output = run_awk(r#"BEGIN { print toupper("MiXed 1"), tolower("MiXed 1") }"#, "").unwrap();
    assert_eq!(output, "MIXED 1 mixed 1\n");
}

#[test]
fn test_int_truncates_toward_zero() {
    let output = run_awk("BEGIN { print int(3.9), int(-3.9), int(0.5) }", "").unwrap();
    assert_eq!(output, "3 -3 0\n");
}

#[test]
fn test_math_builtins() {
    let output = run_awk(
        "BEGIN { print sqrt(16), exp(0), log(1), int(atan2(0, 1)), cos(0), int(sin(0)) }",
        "",
    )
    .unwrap();
    assert_eq!(output, "4 1 0 0 1 0\n");
}

#[test]
fn test_math_domain_errors_are_fatal() {
    assert!(run_awk("BEGIN { print sqrt(-1) }", "").is_err());
    assert!(run_awk("BEGIN { print log(0) }", "").is_err());
}

#[test]
fn test_seeded_rand_is_reproducible() {
    let program = r#"BEGIN{srand(42); printf "%.3f\n", rand()}"#;
    let first = run_awk(program, "").unwrap();
    let second = run_awk(program, "").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_srand_returns_previous_seed() {
    let output = run_awk("BEGIN { srand(10); print srand(20) }", "").unwrap();
    assert_eq!(output, "10\n");
}

#[test]
fn test_rand_in_unit_interval() {
    let program = r#"BEGIN {
        srand(1)
        for (i = 0; i < 100; i++) { x = rand(); if (x < 0 || x >= 1) bad++ }
        print bad + 0
    }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "0\n");
}

#[test]
fn test_system_returns_exit_status() {
    let output = run_awk(r#"BEGIN { print system("exit 3") }"#, "").unwrap();
    assert_eq!(output, "3\n");
}

// ============================================================================
// printf Tests
// ============================================================================

#[test]
fn test_printf_basic_conversions() {
    let program = r#"BEGIN { printf "%d|%i|%o|%x|%X|%u\n", 42, -7, 8, 255, 255, 7 }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "42|-7|10|ff|FF|7\n");
}

#[test]
fn test_printf_float_conversions() {
    let program = r#"BEGIN { printf "%.2f|%.2e|%g\n", 3.14159, 1234.5, 0.5 }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "3.14|1.23e+03|0.5\n");
}

#[test]
fn test_printf_char_and_percent() {
    let program = r#"BEGIN { printf "%c%c|100%%\n", 65, "xyz" }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "Ax|100%\n");
}

#[test]
fn test_printf_width_flags() {
    let program = r#"BEGIN { printf "[%5d][%-5d][%05d][%+d]\n", 42, 42, 42, 42 }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "[   42][42   ][00042][+42]\n");
}

#[test]
fn test_printf_star_width_and_precision() {
    let program = r#"BEGIN { printf "[%*d][%.*f]\n", 6, 42, 2, 3.14159 }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "[    42][3.14]\n");
}

#[test]
fn test_printf_missing_args_is_fatal() {
    assert!(run_awk(r#"BEGIN { printf "%d %d\n", 1 }"#, "").is_err());
}

#[test]
fn test_printf_extra_args_ignored() {
    let output = run_awk(r#"BEGIN { printf "%d\n", 1, 2, 3 }"#, "").unwrap();
    assert_eq!(output, "1\n");
}

#[test]
fn test_printf_no_trailing_newline() {
    let output = run_awk(r#"BEGIN { printf "a"; printf "b" }"#, "").unwrap();
    assert_eq!(output, "ab");
}

// ============================================================================
// getline Tests
// ============================================================================

#[test]
fn test_getline_from_main_input() {
    let program = r#"NR == 1 { getline; print "second:" $0 }"#;
    let output = run_awk(program, "one\ntwo\nthree").unwrap();
    assert_eq!(output, "second:two\n");
}

#[test]
fn test_getline_var_updates_nr_not_fields() {
    let program = r#"NR == 1 { getline line; print NR, line, $0 }"#;
    let output = run_awk(program, "one\ntwo").unwrap();
    assert_eq!(output, "2 two one\n");
}

#[test]
fn test_getline_in_begin_reads_stdin() {
    let program = r#"BEGIN { while ((getline line) > 0) n++; print n }"#;
    let output = run_awk(program, "a\nb\nc\n").unwrap();
    assert_eq!(output, "3\n");
}

#[test]
fn test_getline_returns_zero_at_eof() {
    let program = r#"BEGIN { print getline }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "0\n");
}

#[test]
fn test_getline_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, "alpha\nbeta\n").unwrap();

    let program = format!(
        r#"BEGIN {{ while ((getline line < "{}") > 0) print "got", line }}"#,
        path.display()
    );
    let output = run_awk(&program, "").unwrap();
    assert_eq!(output, "got alpha\ngot beta\n");
}

#[test]
fn test_getline_from_missing_file_returns_minus_one() {
    let program = r#"BEGIN { print (getline line < "/definitely/not/here") }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "-1\n");
}

#[test]
fn test_getline_from_command() {
    let program = r#"BEGIN { "echo hello" | getline line; print line }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "hello\n");
}

#[test]
fn test_getline_command_into_record() {
    let program = r#"BEGIN { "echo a b c" | getline; print NF, $2 }"#;
    let output = run_awk(program, "").unwrap();
    assert_eq!(output, "3 b\n");
}

#[test]
fn test_close_reopens_file_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, "first\nsecond\n").unwrap();

    let program = format!(
        r#"BEGIN {{
            getline a < "{p}"
            close("{p}")
            getline b < "{p}"
            print a, b
        }}"#,
        p = path.display()
    );
    let output = run_awk(&program, "").unwrap();
    assert_eq!(output, "first first\n");
}

// ============================================================================
// Output Redirection Tests
// ============================================================================

#[test]
fn test_print_redirect_truncate_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");

    let program = format!(
        r#"BEGIN {{
            print "one" > "{p}"
            print "two" > "{p}"
            close("{p}")
            print "three" >> "{p}"
        }}"#,
        p = path.display()
    );
    run_awk(&program, "").unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "one\ntwo\nthree\n"
    );
}

#[test]
fn test_close_returns_one_then_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.txt");

    let program = format!(
        r#"BEGIN {{
            print "x" > "{p}"
            print close("{p}")
            print close("{p}")
        }}"#,
        p = path.display()
    );
    let output = run_awk(&program, "").unwrap();
    assert_eq!(output, "1\n0\n");
}

#[test]
fn test_printf_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fmt.txt");

    let program = format!(r#"BEGIN {{ printf "%03d\n", 7 > "{}" }}"#, path.display());
    run_awk(&program, "").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "007\n");
}

// ============================================================================
// ARGV / Multi-file Tests
// ============================================================================

#[test]
fn test_multiple_files_fnr_resets() {
    let dir = tempfile::tempdir().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    std::fs::write(&one, "a\nb\n").unwrap();
    std::fs::write(&two, "c\nd\n").unwrap();

    let output = run_awk_args(
        "{ print FNR, NR }",
        "",
        &[one.to_str().unwrap(), two.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(output, "1 1\n2 2\n1 3\n2 4\n");
}

#[test]
fn test_filename_tracks_current_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("named.txt");
    std::fs::write(&path, "x\n").unwrap();

    let output = run_awk_args("{ print FILENAME }", "", &[path.to_str().unwrap()]).unwrap();
    assert_eq!(output, format!("{}\n", path.display()));
}

#[test]
fn test_command_line_assignment_applies_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let one = dir.path().join("one.txt");
    let two = dir.path().join("two.txt");
    std::fs::write(&one, "r1\n").unwrap();
    std::fs::write(&two, "r2\n").unwrap();

    let output = run_awk_args(
        r#"{ print $0 ":" x }"#,
        "",
        &[one.to_str().unwrap(), "x=7", two.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(output, "r1:\nr2:7\n");
}

#[test]
fn test_assignment_operand_binds_numeric_string() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    std::fs::write(&path, "line\n").unwrap();

    let output = run_awk_args(
        r#"{ if (x == 10) print "numeric" }"#,
        "",
        &["x=10", path.to_str().unwrap()],
    )
    .unwrap();
    assert_eq!(output, "numeric\n");
}

#[test]
fn test_argc_argv_visible() {
    let output = run_awk_args(
        r#"BEGIN { print ARGC, ARGV[0], ARGV[1] }"#,
        "",
        &["data.txt"],
    )
    .unwrap();
    assert_eq!(output, "2 pawk data.txt\n");
}

#[test]
fn test_missing_input_file_is_fatal() {
    assert!(run_awk_args("{ print }", "", &["/definitely/not/here.txt"]).is_err());
}

#[test]
fn test_environ_is_populated() {
    // PATH is reliably present in any test environment
    let output = run_awk(r#"BEGIN { print ("PATH" in ENVIRON) }"#, "").unwrap();
    assert_eq!(output, "1\n");
}

// ============================================================================
// Host Callback Tests
// ============================================================================

fn run_with_natives(
    program: &str,
    natives: NativeRegistry,
    input: &str,
) -> Result<String, String> {
    let compiled = pawk::compile_with_natives(program, &natives).map_err(|e| e.to_string())?;
    let mut interpreter = Interpreter::new(&compiled);
    interpreter.set_natives(natives);
    let mut output = Vec::new();
    interpreter
        .run(BufReader::new(Cursor::new(input.to_string())), &mut output)
        .map_err(|e| e.to_string())?;
    String::from_utf8(output).map_err(|e| e.to_string())
}

#[test]
fn test_native_scalar_callback() {
    let mut natives = NativeRegistry::new();
    natives.register(
        "triple",
        vec![NativeParam::Num],
        |args: &mut [NativeValue]| {
            let NativeValue::Num(n) = args[0] else {
                return Err("expected number".into());
            };
            Ok(NativeValue::Num(n * 3.0))
        },
    );

    let output = run_with_natives("BEGIN { print triple(14) }", natives, "").unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_native_map_write_back() {
    let mut natives = NativeRegistry::new();
    natives.register(
        "fill",
        vec![NativeParam::Map],
        |args: &mut [NativeValue]| {
            let NativeValue::Map(map) = &mut args[0] else {
                return Err("expected map".into());
            };
            map.insert("answer".into(), "42".into());
            Ok(NativeValue::Num(0.0))
        },
    );

    let program = r#"BEGIN { fill(result); print result["answer"] + 0 }"#;
    let output = run_with_natives(program, natives, "").unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_native_error_becomes_runtime_error() {
    let mut natives = NativeRegistry::new();
    natives.register("boom", vec![], |_: &mut [NativeValue]| Err("kaput".into()));

    let result = run_with_natives("BEGIN { boom() }", natives, "");
    assert!(result.unwrap_err().contains("kaput"));
}

#[test]
fn test_native_arity_checked_at_resolve() {
    let mut natives = NativeRegistry::new();
    natives.register("one", vec![NativeParam::Num], |_: &mut [NativeValue]| {
        Ok(NativeValue::Num(0.0))
    });

    assert!(run_with_natives("BEGIN { one(1, 2) }", natives, "").is_err());
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn test_parse_error_reported() {
    assert!(pawk::compile("BEGIN { print ( }").is_err());
}

#[test]
fn test_runtime_error_carries_location() {
    let err = run_awk("BEGIN {\n  x = 1 / 0\n}", "").unwrap_err();
    assert!(err.contains("line 2"), "unexpected message: {}", err);
    assert!(err.contains("division by zero"), "unexpected message: {}", err);
}

#[test]
fn test_array_in_scalar_context_message() {
    let program = "function f(a) { return a } BEGIN { b[1] = 1; f(b) }";
    let err = run_awk(program, "").unwrap_err();
    assert!(err.contains("array"), "unexpected message: {}", err);
}

#[test]
fn test_invalid_printf_conversion_is_fatal() {
    assert!(run_awk(r#"BEGIN { printf "%q\n", 1 }"#, "").is_err());
}
