use crate::domain::TagDomain;

pub fn classification_prompt(domain: TagDomain, item: &str) -> String {
    match domain {
        TagDomain::Age => age_prompt(item),
        TagDomain::Sex => sex_prompt(item),
        TagDomain::Bmi => bmi_prompt(item),
        TagDomain::Species => species_prompt(item),
    }
}

fn category_list(domain: TagDomain) -> String {
    serde_json::to_string(domain.categories()).unwrap_or_default()
}

fn age_prompt(age: &str) -> String {
    format!(
        r#"### Task:
Determine the age category for the given age expression **{age}**, based on the following list of age categories:

{categories}

Use these general rules (regardless of age):

1. **Prenatal** if the expression refers to any time measured from fertilization or during embryogenesis/fetal development, for example:
- Contains "E" plus a number (e.g. "E10.5"), "embryo", "embryonic"
- Mentions hours/days post fertilization ("hpf", "dpf")
- Uses terms like "fetus", "fetal", "gestational", "cleavage", "blastula", "gastrula"
2. **Postnatal** if it refers to any time measured from birth or hatching onward, for example:
- Contains "P" plus a number (e.g. "P7"), "neonate", "newborn"
- Specifies "X days/weeks/months/years old"
- Uses life-stage terms anchored to post-birth (e.g. "juvenile", "adult", "aged")
3. If an expression could apply to both (or you're uncertain), return `["unknown"]`.

### Rules:
1. Only select one age category from the provided list.
2. If **{age}** does not fit into any of these age categories, output `["others"]`.

### Output format:
Always respond in this format:
`["age"]`

For example:
If **{age}** is "E14.5", output `["prenatal"]`.
If **{age}** is "3 days old", output `["postnatal"]`.
If **{age}** is not in the list, output `["others"]`.
"#,
        categories = category_list(TagDomain::Age),
    )
}

fn sex_prompt(sex: &str) -> String {
    format!(
        r#"### Task:
Determine the sex category for the given organism **{sex}**, based on the following list of sex categories:

{categories}

### Rules:
1. Only select one sex category from the provided list.
2. If **{sex}** does not fit into any of these sex categories, output `["others"]`.

### Output format:
Always respond in this format:
`["sex"]`

For example:
If **{sex}** is "male", output `["male"]`.
If **{sex}** is not in the list, output `["others"]`.
"#,
        categories = category_list(TagDomain::Sex),
    )
}

fn bmi_prompt(bmi: &str) -> String {
    format!(
        r#"You are a Body mass index (BMI) classification assistant. Using the following BMI categories:

  * Underweight = BMI < 18.5
  * Normal weight = BMI 18.5-24.9
  * Overweight = BMI 25-29.9
  * Obesity = BMI >= 30

### Task:
Determine the BMI category for the given BMI expression **{bmi}**, based on the following list of BMI categories:

{categories}

### Rules:
1. Only select one BMI category from the provided list.
2. If **{bmi}** does not fit into any of these BMI categories, output `["others"]`.

### Output format:
Always respond in this format:
`["BMI category"]`

For example:
If **{bmi}** is "17.8", output `["Underweight"]`.
If **{bmi}** is "24.5", output `["Normal weight"]`.
If **{bmi}** is not in the list, output `["others"]`.
"#,
        categories = category_list(TagDomain::Bmi),
    )
}

fn species_prompt(species: &str) -> String {
    format!(
        r#"### Task:
Determine which species category the given organism **{species}** belongs to, based on the provided categories.

Categories: {categories}

Rules:
1. Select exactly one category from the list.
2. If no match, return ["others"].

Output format:
Always respond as a JSON array, e.g. ["Homo sapiens"].
"#,
        categories = category_list(TagDomain::Species),
    )
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn prompt_embeds_item_and_categories() {
        for &domain in TagDomain::value_variants() {
            let prompt = classification_prompt(domain, "E14.5");
            assert!(prompt.contains("**E14.5**"));
            for category in domain.categories() {
                assert!(prompt.contains(category), "{domain} prompt lacks {category}");
            }
            assert!(prompt.contains("others"));
        }
    }

    #[test]
    fn age_prompt_documents_embryonic_example() {
        let prompt = classification_prompt(TagDomain::Age, "P7");
        assert!(prompt.contains(r#"If **P7** is "E14.5", output `["prenatal"]`."#));
    }
}
