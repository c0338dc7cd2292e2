//! Confusion matrices and per-class precision/recall/F1 reports.

use clap::ValueEnum;
use ndarray::{Array2, Axis};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    /// Global counts of true positives, false positives and false negatives.
    Micro,
    /// Unweighted mean over classes.
    Macro,
    /// Mean over classes weighted by support.
    Weighted,
}

/// Rows are true labels, columns are predictions.
pub fn confusion_matrix(targets: &[usize], predictions: &[usize], classes: usize) -> Array2<u64> {
    let mut matrix = Array2::zeros((classes, classes));
    for (&target, &prediction) in targets.iter().zip(predictions) {
        matrix[[target, prediction]] += 1;
    }
    matrix
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Scores {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: u64,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0. {
        0.
    } else {
        numerator / denominator
    }
}

impl Scores {
    fn from_counts(true_positives: u64, predicted: u64, support: u64) -> Self {
        let precision = ratio(true_positives as f64, predicted as f64);
        let recall = ratio(true_positives as f64, support as f64);

        Self {
            precision,
            recall,
            f1_score: ratio(2. * precision * recall, precision + recall),
            support,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<(String, Scores)>,
    pub accuracy: f64,
    pub macro_avg: Scores,
    pub weighted_avg: Scores,
    pub micro_avg: Scores,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(matrix: &Array2<u64>, names: &[&str]) -> Self {
        let predicted = matrix.sum_axis(Axis(0));
        let supports = matrix.sum_axis(Axis(1));
        let total = supports.sum();
        let correct = matrix.diag().sum();

        let classes: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let scores =
                    Scores::from_counts(matrix[[index, index]], predicted[index], supports[index]);
                (name.to_string(), scores)
            })
            .collect();

        let mean = |weight: &dyn Fn(&Scores) -> f64| {
            let weights: f64 = classes.iter().map(|(_, scores)| weight(scores)).sum();
            let average = |field: fn(&Scores) -> f64| {
                ratio(
                    classes
                        .iter()
                        .map(|(_, scores)| weight(scores) * field(scores))
                        .sum(),
                    weights,
                )
            };
            Scores {
                precision: average(|scores| scores.precision),
                recall: average(|scores| scores.recall),
                f1_score: average(|scores| scores.f1_score),
                support: total,
            }
        };

        let macro_avg = mean(&|_| 1.);
        let weighted_avg = mean(&|scores| scores.support as f64);

        Self {
            accuracy: ratio(correct as f64, total as f64),
            micro_avg: Scores::from_counts(correct, total, total),
            classes,
            macro_avg,
            weighted_avg,
        }
    }

    pub fn average(&self, average: Average) -> Scores {
        match average {
            Average::Micro => self.micro_avg,
            Average::Macro => self.macro_avg,
            Average::Weighted => self.weighted_avg,
        }
    }
}

/// Serializes in the familiar scikit-learn `output_dict` layout.
impl Serialize for ClassificationReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.classes.len() + 3))?;
        for (name, scores) in &self.classes {
            map.serialize_entry(name, scores)?;
        }
        map.serialize_entry("accuracy", &self.accuracy)?;
        map.serialize_entry("macro avg", &self.macro_avg)?;
        map.serialize_entry("weighted avg", &self.weighted_avg)?;
        map.end()
    }
}
