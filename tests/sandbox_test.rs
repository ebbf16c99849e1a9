//! Sandbox behaviour tests
//!
//! Run realistic generated programs through the public executor and check
//! both what they print and what they are denied.

use logiq::sandbox::{validate, ExecutionResult, Executor, OutputSink, Verbosity};
use logiq::CapabilityCatalog;

fn run(source: &str) -> ExecutionResult {
    Executor::standard().execute(source)
}

fn run_detailed(source: &str) -> ExecutionResult {
    Executor::new(CapabilityCatalog::standard(), Verbosity::Detailed).execute(source)
}

fn output(source: &str) -> String {
    match run_detailed(source) {
        ExecutionResult::Success(out) => out,
        ExecutionResult::Failure(msg) => panic!("program failed: {}\n---\n{}", msg, source),
    }
}

#[test]
fn test_scenario_two_plus_two() {
    assert_eq!(run("print(2+2)"), ExecutionResult::Success("4\n".to_string()));
}

#[test]
fn test_prime_listing() {
    let source = r#"
def is_prime(n):
    if n < 2:
        return False
    for d in range(2, int(n ** 0.5) + 1):
        if n % d == 0:
            return False
    return True

primes = [n for n in range(2, 30) if is_prime(n)]
print(f"There are {len(primes)} primes below 30: {primes}")
"#;
    assert_eq!(
        output(source),
        "There are 10 primes below 30: [2, 3, 5, 7, 11, 13, 17, 19, 23, 29]\n"
    );
}

#[test]
fn test_memoized_recursion() {
    let source = r#"
memo = {}
def fib(n):
    if n in memo:
        return memo[n]
    result = n if n < 2 else fib(n - 1) + fib(n - 2)
    memo[n] = result
    return result

print("The 50th Fibonacci number is", fib(50))
"#;
    assert_eq!(output(source), "The 50th Fibonacci number is 12586269025\n");
}

#[test]
fn test_word_frequencies() {
    let source = r#"
text = "the cat and the hat and the bat"
counts = {}
for word in text.split():
    counts[word] = counts.get(word, 0) + 1
top = sorted(counts.items(), key=lambda kv: (-kv[1], kv[0]))
for word, n in top[:2]:
    print(f"{word}: {n}")
"#;
    assert_eq!(output(source), "the: 3\nand: 2\n");
}

#[test]
fn test_modules_and_formatting() {
    assert_eq!(output("import math\nprint(f\"Area: {math.pi * 2 ** 2:.2f}\")"), "Area: 12.57\n");
    assert_eq!(output("from math import sqrt as root\nprint(root(16))"), "4.0\n");
    assert_eq!(output("print(math.gcd(12, 18), math.factorial(5))"), "6 120\n");
    assert_eq!(
        output("import re\nprint(re.findall(r\"\\d+\", \"a1b22c333\"))"),
        "['1', '22', '333']\n"
    );
    assert_eq!(output("print(0.1 + 0.2, 1/3, 10/2)"), "0.30000000000000004 0.3333333333333333 5.0\n");
    assert_eq!(output("print(', '.join(str(i) for i in range(3)))"), "0, 1, 2\n");
    assert_eq!(output("print(divmod(-7, 2), -7 // 2, -7 % 2)"), "(-4, 1) -4 1\n");
}

#[test]
fn test_control_flow() {
    let source = r#"
try:
    x = 1 / 0
except:
    x = -1
finally:
    print("done")
print(x)

total = 0
i = 0
while i < 5:
    i += 1
    if i == 2:
        continue
    total += i
else:
    print("total", total)

a, (b, c) = 1, [2, 3]
print(a + b + c, sep="", end="!\n")
"#;
    assert_eq!(output(source), "done\n-1\ntotal 13\n6!\n");
}

#[test]
fn test_error_prefix_in_output_is_still_success() {
    let result = run("print('Error: not really an error')");
    assert_eq!(result, ExecutionResult::Success("Error: not really an error\n".to_string()));
}

#[test]
fn test_capabilities_outside_catalog_fail() {
    let denied = [
        "open('/etc/passwd')",
        "__import__('os')",
        "import os",
        "from subprocess import run",
        "eval('1 + 1')",
        "exec('print(1)')",
        "print(''.__class__)",
        "print(math.__dict__)",
        "input()",
        "globals()",
    ];
    for source in denied {
        assert_eq!(run(source), ExecutionResult::Failure("Error".to_string()), "{}", source);
        let detailed = run_detailed(source);
        assert!(!detailed.is_success(), "{}", source);
        assert!(detailed.text().starts_with("Error: "), "{}", source);
    }
}

#[test]
fn test_detailed_failure_kinds() {
    assert_eq!(
        run_detailed("open('x')").text(),
        "Error: NameError: name 'open' is not defined"
    );
    assert_eq!(
        run_detailed("import os").text(),
        "Error: ImportError: import of 'os' is not allowed"
    );
    assert_eq!(
        run_detailed("print(''.__class__)").text(),
        "Error: AttributeError: access to attribute '__class__' is not allowed"
    );
    assert_eq!(
        run_detailed("def f(n):\n    return f(n + 1)\nf(0)").text(),
        "Error: RecursionError: maximum recursion depth exceeded"
    );
    assert!(run_detailed("print(2.0 ** 5000)").text().starts_with("Error: OverflowError"));
    assert!(run_detailed("print(10 ** 10 ** 8)").text().starts_with("Error: MemoryError"));
    assert!(run_detailed("print(\"unterminated").text().starts_with("Error: Invalid syntax (line 1:"));
    assert_eq!(run_detailed("assert 1 == 2").text(), "Error: AssertionError");
}

#[test]
fn test_narrow_catalog() {
    let catalog = CapabilityCatalog::new(["print"], ["math"]).unwrap();
    let executor = Executor::new(std::sync::Arc::new(catalog), Verbosity::Detailed);

    assert_eq!(executor.execute("print(math.floor(2.5))"), ExecutionResult::Success("2\n".to_string()));
    assert_eq!(
        executor.execute("print(len([1]))").text(),
        "Error: NameError: name 'len' is not defined"
    );
    assert_eq!(
        executor.execute("import random").text(),
        "Error: ImportError: import of 'random' is not allowed"
    );
    assert_eq!(
        executor.execute("print(random.random())").text(),
        "Error: NameError: name 'random' is not defined"
    );
}

#[test]
fn test_unparsable_text_never_touches_sink() {
    let mut sink = OutputSink::new();
    for text in ["", "   ", "def (", "Error: Failed to generate response. Error: timeout"] {
        assert!(!validate(text));
        let result = Executor::standard().execute_into(text, &mut sink);
        assert_eq!(result, ExecutionResult::Failure("Error".to_string()));
    }
    assert!(sink.is_empty());
}

#[test]
fn test_execution_is_idempotent() {
    let source = "squares = {n: n * n for n in range(5)}\nprint(sorted(squares.values(), reverse=True))";
    let first = run(source);
    assert_eq!(first, ExecutionResult::Success("[16, 9, 4, 1, 0]\n".to_string()));
    assert_eq!(run(source), first);
}

#[test]
fn test_concurrent_runs_are_isolated() {
    let executor = Executor::standard();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let executor = &executor;
                scope.spawn(move || {
                    let source = format!("for _ in range(50):\n    x = {}\nprint(x)", i);
                    (i, executor.execute(&source))
                })
            })
            .collect();

        for handle in handles {
            let (i, result) = handle.join().unwrap();
            assert_eq!(result, ExecutionResult::Success(format!("{}\n", i)));
        }
    });
}

#[test]
fn test_integers_are_arbitrary_precision() {
    assert_eq!(output("print(2**100)"), "1267650600228229401496703205376\n");
    assert_eq!(output("import math\nprint(math.factorial(30))"), "265252859812191058636308480000000\n");
    assert_eq!(output("print(int('9'*30))"), format!("{}\n", "9".repeat(30)));
    assert_eq!(output("print(pow(10, 20), 1 << 70)"), "100000000000000000000 1180591620717411303424\n");
    assert_eq!(output("n = 2**64\nprint(n // 3, n % 7, n - 2**64 + 1)"), "6148914691236517205 2 1\n");
    assert_eq!(output("print(f\"{2**70:,}\")"), "1,180,591,620,717,411,303,424\n");
}

#[test]
fn test_star_unpacking_and_variadic_functions() {
    let source = r#"
first, *middle, last = range(6)
print(first, middle, last)

def total(*args, scale=1, **named):
    return scale * (sum(args) + sum(named.values()))

print(total(1, 2, 3), total(1, scale=10, extra=4))

def counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    return bump

tick = counter()
tick()
print(tick())
"#;
    assert_eq!(output(source), "0 [1, 2, 3, 4] 5\n6 50\n2\n");
}

#[test]
fn test_dict_views_and_debug_fields() {
    assert_eq!(
        output("d = {'a': 1, 'b': 2}\nprint(d.keys(), d.values())"),
        "dict_keys(['a', 'b']) dict_values([1, 2])\n"
    );
    assert_eq!(output("x = 3\nprint(f'{x=} {x * 2 = }')"), "x=3 x * 2 = 6\n");
}

const DEEP_LIST: &str = "a = []\nfor i in range(3000000):\n    a = [a]\n";

#[test]
fn test_deeply_nested_values_drop_without_crashing() {
    let source = format!("{}print('built')", DEEP_LIST);
    assert_eq!(run(&source), ExecutionResult::Success("built\n".to_string()));
}

#[test]
fn test_long_closure_chain_drops_without_crashing() {
    let source = "f = None\nfor i in range(3000000):\n    f = (lambda g: (lambda: g))(f)\nprint('ok')";
    assert_eq!(run(source), ExecutionResult::Success("ok\n".to_string()));
}

#[test]
fn test_dict_views_are_unhashable() {
    assert_eq!(
        run_detailed("d = {'a': 1}\ns = {d.keys()}").text(),
        "Error: TypeError: unhashable type: 'dict_keys'"
    );
}

#[test]
fn test_deeply_nested_repr_raises() {
    let source = format!("{}x = str(a)", DEEP_LIST);
    assert_eq!(
        run_detailed(&source).text(),
        "Error: RecursionError: maximum recursion depth exceeded while getting the repr of an object"
    );
}

#[test]
fn test_deeply_nested_comparison_raises() {
    let source = "a = []\nb = []\nfor i in range(3000000):\n    a = [a]\n    b = [b]\nprint(a == b)";
    assert_eq!(
        run_detailed(source).text(),
        "Error: RecursionError: maximum recursion depth exceeded in comparison"
    );
}
