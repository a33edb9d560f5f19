//! Models offered by default, and ready-made programs for `/run`
//!
//! The session only ever passes a model's `id` to the engine; the other
//! fields exist for display.

use serde::Serialize;

/// A selectable model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Identifier understood by the model engine
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub size_gb: f32,
}

pub const AVAILABLE_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "llama3.2:1b",
        display_name: "Llama 3.2 1B (Small)",
        description: "Quantization: Q8_0",
        size_gb: 1.3,
    },
    ModelInfo {
        id: "llama3.2:1b-instruct-fp16",
        display_name: "Llama 3.2 1B (Medium)",
        description: "Quantization: Full / FP16",
        size_gb: 2.5,
    },
    ModelInfo {
        id: "qwen2.5-coder:1.5b",
        display_name: "Qwen 2.5 Coder 1.5B",
        description: "Quantization: Q4_K_M, tuned for code",
        size_gb: 1.0,
    },
    ModelInfo {
        id: "mistral:7b",
        display_name: "Mistral 7B (Medium)",
        description: "Quantization: Q4_0",
        size_gb: 4.1,
    },
];

/// Look up a catalog entry by id
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    AVAILABLE_MODELS.iter().find(|model| model.id == id)
}

/// A ready-made program the user can run without the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeExample {
    pub name: &'static str,
    pub code: &'static str,
}

pub const CODE_EXAMPLES: &[CodeExample] = &[
    CodeExample {
        name: "primes",
        code: "def is_prime(n):
    if n < 2:
        return False
    for i in range(2, int(n**0.5) + 1):
        if n % i == 0:
            return False
    return True

count = 0
num = 2

while count < 10:
    if is_prime(num):
        print(num)
        count += 1
    num += 1",
    },
    CodeExample {
        name: "numpy",
        code: "import numpy as np

a = np.array([1, 2, 3, 4, 5])
b = a ** 2

for x, y in zip(a, b):
    print(f\"{x} squared is {y}\")",
    },
];

/// Look up a code example by name, ignoring case
pub fn find_example(name: &str) -> Option<&'static CodeExample> {
    CODE_EXAMPLES
        .iter()
        .find(|example| example.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_model() {
        assert_eq!(find_model("mistral:7b").map(|m| m.display_name), Some("Mistral 7B (Medium)"));
        assert!(find_model("not-a-model").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        for (i, model) in AVAILABLE_MODELS.iter().enumerate() {
            assert!(AVAILABLE_MODELS[i + 1..].iter().all(|other| other.id != model.id));
        }
    }

    #[test]
    fn test_find_example() {
        assert!(find_example("Primes").is_some_and(|e| e.code.contains("is_prime")));
        assert!(find_example("numpy").is_some_and(|e| e.code.starts_with("import numpy")));
        assert!(find_example("pandas").is_none());
    }
}
